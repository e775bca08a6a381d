//! Audit request manager
//!
//! Investigative, largely read-only workflows that may end in a proposed (never
//! auto-applied) mutation. Creation is stage-gated; approval with `materialize`
//! records a distinct propose record, which becomes a live commit only under a
//! separately authorized `auto_commit`.

pub mod manager;
pub mod models;

pub use manager::{ApproveOptions, AuditManager, FindingsOptions};
pub use models::{
    AuditFinding, AuditOutputKind, AuditRequest, AuditRequestSpec, AuditStatus, FindingSeverity,
    ProposeRecord, ProposedCommitDraft,
};
