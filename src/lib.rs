//! GridLedger - deterministic computation and governance ledger
//!
//! A hierarchical "tree of sheets": leaf data grids feed aggregating branches
//! feed a single trunk. Every mutation is an append-only commit; dependent
//! formulas recompute synchronously in topological order; KPI metrics roll
//! upward with full contributor provenance; and each class of mutation is
//! permitted only once the issuing actor/scope has cleared the required
//! governance stage.
//!
//! Core guarantees:
//! - Any sheet is reconstructible value-for-value by replaying its commit log,
//!   verified by canonical content hashes (a mismatch halts the sheet).
//! - Cells inside a reference cycle, and everything depending on them, are
//!   `Indeterminate` - withheld, never stale.
//! - Governance stages change only via an explicit commit carrying an
//!   authority reference; recommendations and votes never mutate state.

pub mod aggregate;
pub mod audit;
pub mod engine;
pub mod error;
pub mod formula;
pub mod governance;
pub mod ledger;
pub mod model;
pub mod router;

pub use aggregate::{HierarchyStore, KpiBinding, KpiSnapshot, TrunkMetric, TrunkMetrics};
pub use audit::{
    ApproveOptions, AuditFinding, AuditManager, AuditOutputKind, AuditRequest, AuditRequestSpec,
    AuditStatus, FindingsOptions, ProposeRecord, ProposedCommitDraft,
};
pub use engine::Engine;
pub use error::{LedgerError, LedgerResult};
pub use formula::{DependencyGraph, GraphSummary};
pub use governance::{
    apply_committed_stage_unlock, can_execute, recommend_stage_unlock, GateDecision, GateTrack,
    RefusalReason, StageState, StageUnlockOutcome, StageUnlockRequest,
};
pub use ledger::{CellFormulaState, CommitOutcome, LedgerStore, ReplayReport};
pub use model::{Cell, CellInput, CellRef, CellValue, Commit, CommitKind, CommitPayload, FormulaStatus};
pub use router::{EventRouter, RouteReceipt, RouteRegistry};
