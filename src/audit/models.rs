//! Audit request data models

use crate::model::{CommitKind, CommitPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit request status in the governance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Created, not yet assigned
    Created,
    /// Assigned to an investigator
    Assigned,
    /// Findings attached, awaiting decision
    FindingsProduced,
    /// Approved; a draft may have been materialized as a propose record
    Approved,
    /// Rejected by the approver
    Rejected,
}

/// What the audit is expected to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutputKind {
    /// Read-only findings
    Finding,
    /// Findings plus a proposed (non-applied) commit draft
    ProposedCommit,
}

/// Severity classification for a single finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One investigative finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFinding {
    pub object_id: String,
    pub summary: String,
    pub severity: FindingSeverity,
    /// Provenance trail the investigator followed
    pub trace: Vec<String>,
}

/// Drafted mutation attached to an audit; never applied by the audit flow itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedCommitDraft {
    pub changeset_id: Uuid,
    pub sheet_id: String,
    pub cell: String,
    pub kind: CommitKind,
    pub payload: CommitPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Still-unapplied "propose" record produced by an approved, materialized audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub changeset_id: Uuid,
    pub authority_ref: String,
    /// True only after a separately authorized auto-commit
    pub applied: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Creation parameters for an audit request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequestSpec {
    /// Object under investigation (sheet, branch, metric, ...)
    pub target: String,
    pub scope: String,
    pub requester: String,
    pub output_kind: AuditOutputKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_ref: Option<String>,
}

/// An audit request moving through
/// `Created -> Assigned -> FindingsProduced -> Approved | Rejected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub id: Uuid,
    pub target: String,
    pub scope: String,
    pub requester: String,
    pub output_kind: AuditOutputKind,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub findings: Vec<AuditFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_commit_draft: Option<ProposedCommitDraft>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditRequest {
    pub fn new(spec: &AuditRequestSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            target: spec.target.clone(),
            scope: spec.scope.clone(),
            requester: spec.requester.clone(),
            output_kind: spec.output_kind,
            status: AuditStatus::Created,
            assignee: None,
            findings: Vec::new(),
            proposed_commit_draft: None,
            decided_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
