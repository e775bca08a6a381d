//! Audit workflow manager
//!
//! Thread-safe store plus the stage-gated state machine. Transitions are
//! explicit and externally triggered; nothing here progresses on a timer, and
//! no draft ever turns into a live commit without a separately authorized
//! auto-commit.

use crate::audit::models::{
    AuditFinding, AuditOutputKind, AuditRequest, AuditRequestSpec, AuditStatus, ProposeRecord,
    ProposedCommitDraft,
};
use crate::error::{conflict, not_found, LedgerError, LedgerResult};
use crate::governance::{
    action_requirement, can_execute, GateDecision, GateResult, GateTrack, RefusalReason, StageState,
};
use crate::ledger::store::LedgerStore;
use crate::model::{CellRef, Commit};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Options for `produce_audit_findings`
#[derive(Debug, Clone, Default)]
pub struct FindingsOptions {
    /// Draft mutation; only valid on `ProposedCommit` requests
    pub proposed_commit_draft: Option<ProposedCommitDraft>,
}

/// Options for `approve_audit_request`
#[derive(Debug, Clone)]
pub struct ApproveOptions {
    pub by: String,
    /// Record the draft as an unapplied propose record
    pub materialize: bool,
    /// Additionally post the draft as a live commit; requires an independent
    /// `commitPosting` authorization
    pub auto_commit: bool,
    pub authority_ref: Option<String>,
}

/// Thread-safe audit request manager
pub struct AuditManager {
    requests: RwLock<HashMap<Uuid, AuditRequest>>,
    propose_records: RwLock<Vec<ProposeRecord>>,
}

impl AuditManager {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            propose_records: RwLock::new(Vec::new()),
        }
    }

    /// Create a request. Stage-gated before any object exists: `ProposedCommit`
    /// output demands a higher stage (and an authority reference) than
    /// read-only `Finding` output.
    pub fn create_audit_request(
        &self,
        spec: &AuditRequestSpec,
        stage_state: &StageState,
    ) -> LedgerResult<AuditRequest> {
        let action = match spec.output_kind {
            AuditOutputKind::Finding => "auditRequestFinding",
            AuditOutputKind::ProposedCommit => "auditRequestProposedCommit",
        };
        let decision = can_execute(
            action,
            &spec.scope,
            &spec.requester,
            spec.authority_ref.as_deref(),
            stage_state,
        );
        if !decision.ok {
            warn!(scope = %spec.scope, requester = %spec.requester, %decision, "audit request refused");
            return Err(LedgerError::Refused(Box::new(decision)));
        }

        let request = AuditRequest::new(spec);
        let mut requests = self
            .requests
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        requests.insert(request.id, request.clone());
        info!(request = %request.id, target = %request.target, "created audit request");
        Ok(request)
    }

    /// `Created -> Assigned`
    pub fn assign_audit_request(
        &self,
        request_id: Uuid,
        assignee_id: &str,
    ) -> LedgerResult<AuditRequest> {
        self.transition(request_id, |request| {
            if request.status != AuditStatus::Created {
                return Err(conflict(format!(
                    "audit request {} is {:?}, expected Created",
                    request_id, request.status
                )));
            }
            request.status = AuditStatus::Assigned;
            request.assignee = Some(assignee_id.to_string());
            Ok(())
        })
    }

    /// `Assigned -> FindingsProduced`. A draft is accepted only on
    /// `ProposedCommit` requests and is never applied here.
    pub fn produce_audit_findings(
        &self,
        request_id: Uuid,
        findings: Vec<AuditFinding>,
        opts: FindingsOptions,
    ) -> LedgerResult<AuditRequest> {
        self.transition(request_id, |request| {
            if request.status != AuditStatus::Assigned {
                return Err(conflict(format!(
                    "audit request {} is {:?}, expected Assigned",
                    request_id, request.status
                )));
            }
            if let Some(draft) = &opts.proposed_commit_draft {
                if request.output_kind != AuditOutputKind::ProposedCommit {
                    return Err(conflict(
                        "a finding-only audit request cannot carry a commit draft".to_string(),
                    ));
                }
                // A draft that could never post is rejected here, not at approval.
                CellRef::parse(&draft.cell)?;
                Commit::validate_shape(draft.kind, &draft.payload)?;
            }
            request.status = AuditStatus::FindingsProduced;
            request.findings = findings.clone();
            request.proposed_commit_draft = opts.proposed_commit_draft.clone();
            Ok(())
        })
    }

    /// `FindingsProduced -> Approved`.
    ///
    /// With `materialize`, the draft is recorded as exactly one unapplied
    /// propose record. With `auto_commit`, the draft is additionally posted as
    /// a live commit — but only after an independent `commitPosting` gate pass.
    /// Any refusal or failed append leaves the request in `FindingsProduced`.
    pub fn approve_audit_request(
        &self,
        request_id: Uuid,
        opts: &ApproveOptions,
        stage_state: &StageState,
        ledger: &LedgerStore,
    ) -> LedgerResult<AuditRequest> {
        let (scope, draft) = {
            let requests = self
                .requests
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let request = requests
                .get(&request_id)
                .ok_or_else(|| not_found(format!("audit request {} not found", request_id)))?;
            if request.status != AuditStatus::FindingsProduced {
                return Err(conflict(format!(
                    "audit request {} is {:?}, expected FindingsProduced",
                    request_id, request.status
                )));
            }
            (request.scope.clone(), request.proposed_commit_draft.clone())
        };

        if opts.materialize && draft.is_some() {
            let has_authority = opts
                .authority_ref
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .is_some();
            if !has_authority {
                let decision = GateDecision {
                    ok: false,
                    result: GateResult::Refusal,
                    reason: Some(RefusalReason::MissingAuthorityRef),
                    required_stage: action_requirement("auditRequestProposedCommit")
                        .map_or(0, |r| r.required_stage),
                    current_stage: stage_state.current_stage(GateTrack::Global, &scope, &opts.by),
                    track: GateTrack::Global,
                    action: "auditRequestProposedCommit".to_string(),
                };
                warn!(request = %request_id, %decision, "approval refused");
                return Err(LedgerError::Refused(Box::new(decision)));
            }
        }
        if opts.auto_commit {
            if !opts.materialize || draft.is_none() {
                return Err(conflict(
                    "auto-commit requires a materialized commit draft".to_string(),
                ));
            }
            let decision = can_execute(
                "commitPosting",
                &scope,
                &opts.by,
                opts.authority_ref.as_deref(),
                stage_state,
            );
            if !decision.ok {
                return Err(LedgerError::Refused(Box::new(decision)));
            }
        }

        // The draft is posted before the status flips: a refused append (for
        // example a halted sheet) leaves the request in FindingsProduced with
        // no record and no commit.
        let mut record = None;
        if opts.materialize {
            if let Some(draft) = draft {
                let mut pending = ProposeRecord {
                    id: Uuid::new_v4(),
                    request_id,
                    changeset_id: draft.changeset_id,
                    authority_ref: opts.authority_ref.clone().unwrap_or_default(),
                    applied: false,
                    recorded_at: Utc::now(),
                };

                if opts.auto_commit {
                    let outcome =
                        ledger.append_commit(&draft.sheet_id, &draft.cell, draft.kind, draft.payload)?;
                    pending.applied = true;
                    info!(
                        request = %request_id,
                        changeset = %pending.changeset_id,
                        commit = outcome.commit_id,
                        "auto-committed approved audit draft"
                    );
                } else {
                    info!(
                        request = %request_id,
                        changeset = %pending.changeset_id,
                        "recorded unapplied propose record"
                    );
                }
                record = Some(pending);
            }
        }

        let approved = self.transition(request_id, |request| {
            request.status = AuditStatus::Approved;
            request.decided_by = Some(opts.by.clone());
            Ok(())
        })?;

        if let Some(record) = record {
            self.propose_records
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record);
        }

        Ok(approved)
    }

    /// Terminal rejection from any non-terminal status.
    pub fn reject_audit_request(
        &self,
        request_id: Uuid,
        by: &str,
        reason: &str,
    ) -> LedgerResult<AuditRequest> {
        let rejected = self.transition(request_id, |request| {
            if matches!(request.status, AuditStatus::Approved | AuditStatus::Rejected) {
                return Err(conflict(format!(
                    "audit request {} already decided ({:?})",
                    request_id, request.status
                )));
            }
            request.status = AuditStatus::Rejected;
            request.decided_by = Some(by.to_string());
            Ok(())
        })?;
        info!(request = %request_id, by, reason, "rejected audit request");
        Ok(rejected)
    }

    pub fn get_audit_requests(&self) -> Vec<AuditRequest> {
        let requests = self
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<AuditRequest> = requests.values().cloned().collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    pub fn get_propose_records(&self) -> Vec<ProposeRecord> {
        self.propose_records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transition<F>(&self, request_id: Uuid, mutate: F) -> LedgerResult<AuditRequest>
    where
        F: FnOnce(&mut AuditRequest) -> LedgerResult<()>,
    {
        let mut requests = self
            .requests
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let request = requests
            .get_mut(&request_id)
            .ok_or_else(|| not_found(format!("audit request {} not found", request_id)))?;
        mutate(request)?;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }
}

impl Default for AuditManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::models::FindingSeverity;
    use crate::governance::StageState;
    use crate::model::{CellValue, CommitKind, CommitPayload};
    use pretty_assertions::assert_eq;

    fn stage(scope: &str, level: u8) -> StageState {
        let mut state = StageState::default();
        state.gsg_by_scope.insert(scope.to_string(), level);
        state
    }

    fn spec(kind: AuditOutputKind, authority: Option<&str>) -> AuditRequestSpec {
        AuditRequestSpec {
            target: "sheet:p2p-req".into(),
            scope: "plant-a".into(),
            requester: "auditor-1".into(),
            output_kind: kind,
            authority_ref: authority.map(String::from),
        }
    }

    fn findings() -> Vec<AuditFinding> {
        vec![
            AuditFinding {
                object_id: "p2p-req!REQ1".into(),
                summary: "amount disagrees with source document".into(),
                severity: FindingSeverity::High,
                trace: vec!["commit 3".into(), "route requisitionLine".into()],
            },
            AuditFinding {
                object_id: "p2p-req!TOTAL".into(),
                summary: "rollup includes voided line".into(),
                severity: FindingSeverity::Medium,
                trace: vec!["commit 5".into()],
            },
        ]
    }

    fn draft() -> ProposedCommitDraft {
        ProposedCommitDraft {
            changeset_id: Uuid::new_v4(),
            sheet_id: "p2p-req".into(),
            cell: "REQ1".into(),
            kind: CommitKind::CellSet,
            payload: CommitPayload::Value {
                value: CellValue::Number(99.0),
            },
            note: Some("correct to source document".into()),
        }
    }

    #[test]
    fn creation_is_stage_gated_before_any_object_exists() {
        let manager = AuditManager::new();
        let refused = manager.create_audit_request(
            &spec(AuditOutputKind::ProposedCommit, Some("A1")),
            &stage("plant-a", 1),
        );
        assert!(matches!(refused, Err(LedgerError::Refused(_))));
        assert!(manager.get_audit_requests().is_empty());

        // Finding-only audits clear at a lower stage.
        let created = manager
            .create_audit_request(&spec(AuditOutputKind::Finding, None), &stage("plant-a", 1))
            .unwrap();
        assert_eq!(created.status, AuditStatus::Created);
    }

    #[test]
    fn full_lifecycle_yields_one_unapplied_propose_record() {
        let manager = AuditManager::new();
        let ledger = LedgerStore::new();
        ledger.register_sheet("p2p-req", "P2P").unwrap();
        let state = stage("plant-a", 2);

        let request = manager
            .create_audit_request(&spec(AuditOutputKind::ProposedCommit, Some("A1")), &state)
            .unwrap();
        manager
            .assign_audit_request(request.id, "auditor-2")
            .unwrap();
        let produced = manager
            .produce_audit_findings(
                request.id,
                findings(),
                FindingsOptions {
                    proposed_commit_draft: Some(draft()),
                },
            )
            .unwrap();
        assert!(produced.findings.len() >= 2);

        let approved = manager
            .approve_audit_request(
                request.id,
                &ApproveOptions {
                    by: "supervisor-1".into(),
                    materialize: true,
                    auto_commit: false,
                    authority_ref: Some("AUTH-9".into()),
                },
                &state,
                &ledger,
            )
            .unwrap();
        assert_eq!(approved.status, AuditStatus::Approved);

        let records = manager.get_propose_records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].applied, "approval alone never applies a commit");
        assert_eq!(
            records[0].changeset_id,
            produced.proposed_commit_draft.unwrap().changeset_id
        );
        // No live commit reached the sheet.
        assert_eq!(ledger.commit_log("p2p-req").unwrap().len(), 0);
    }

    #[test]
    fn auto_commit_requires_independent_authorization() {
        let manager = AuditManager::new();
        let ledger = LedgerStore::new();
        ledger.register_sheet("p2p-req", "P2P").unwrap();
        let state = stage("plant-a", 2);

        let request = manager
            .create_audit_request(&spec(AuditOutputKind::ProposedCommit, Some("A1")), &state)
            .unwrap();
        manager.assign_audit_request(request.id, "auditor-2").unwrap();
        manager
            .produce_audit_findings(
                request.id,
                findings(),
                FindingsOptions {
                    proposed_commit_draft: Some(draft()),
                },
            )
            .unwrap();

        // Missing authority on the approver: the gate refuses, nothing moves.
        let refused = manager.approve_audit_request(
            request.id,
            &ApproveOptions {
                by: "supervisor-1".into(),
                materialize: true,
                auto_commit: true,
                authority_ref: None,
            },
            &state,
            &ledger,
        );
        assert!(matches!(refused, Err(LedgerError::Refused(_))));
        assert_eq!(
            manager.get_audit_requests()[0].status,
            AuditStatus::FindingsProduced
        );

        // Authorized auto-commit posts the draft and marks the record applied.
        manager
            .approve_audit_request(
                request.id,
                &ApproveOptions {
                    by: "supervisor-1".into(),
                    materialize: true,
                    auto_commit: true,
                    authority_ref: Some("AUTH-9".into()),
                },
                &state,
                &ledger,
            )
            .unwrap();
        let records = manager.get_propose_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].applied);
        assert_eq!(ledger.commit_log("p2p-req").unwrap().len(), 1);
    }

    #[test]
    fn malformed_draft_never_attaches() {
        let manager = AuditManager::new();
        let state = stage("plant-a", 2);
        let request = manager
            .create_audit_request(&spec(AuditOutputKind::ProposedCommit, Some("A1")), &state)
            .unwrap();
        manager.assign_audit_request(request.id, "auditor-2").unwrap();

        let mut bad = draft();
        bad.cell = "req1".into();
        let refused = manager.produce_audit_findings(
            request.id,
            findings(),
            FindingsOptions {
                proposed_commit_draft: Some(bad),
            },
        );
        assert!(matches!(refused, Err(LedgerError::MalformedPayload(_))));

        let current = &manager.get_audit_requests()[0];
        assert_eq!(current.status, AuditStatus::Assigned);
        assert!(current.findings.is_empty());
    }

    #[test]
    fn failed_auto_commit_leaves_the_request_undecided() {
        let manager = AuditManager::new();
        let ledger = LedgerStore::new();
        ledger.register_sheet("p2p-req", "P2P").unwrap();
        let state = stage("plant-a", 2);

        let request = manager
            .create_audit_request(&spec(AuditOutputKind::ProposedCommit, Some("A1")), &state)
            .unwrap();
        manager.assign_audit_request(request.id, "auditor-2").unwrap();
        manager
            .produce_audit_findings(
                request.id,
                findings(),
                FindingsOptions {
                    proposed_commit_draft: Some(draft()),
                },
            )
            .unwrap();
        ledger.halt("p2p-req").unwrap();

        let failed = manager.approve_audit_request(
            request.id,
            &ApproveOptions {
                by: "supervisor-1".into(),
                materialize: true,
                auto_commit: true,
                authority_ref: Some("AUTH-9".into()),
            },
            &state,
            &ledger,
        );
        assert!(matches!(failed, Err(LedgerError::SheetHalted(_))));
        assert_eq!(
            manager.get_audit_requests()[0].status,
            AuditStatus::FindingsProduced
        );
        assert!(manager.get_propose_records().is_empty());
    }

    #[test]
    fn materializing_without_authority_is_a_structured_refusal() {
        let manager = AuditManager::new();
        let ledger = LedgerStore::new();
        ledger.register_sheet("p2p-req", "P2P").unwrap();
        let state = stage("plant-a", 2);

        let request = manager
            .create_audit_request(&spec(AuditOutputKind::ProposedCommit, Some("A1")), &state)
            .unwrap();
        manager.assign_audit_request(request.id, "auditor-2").unwrap();
        manager
            .produce_audit_findings(
                request.id,
                findings(),
                FindingsOptions {
                    proposed_commit_draft: Some(draft()),
                },
            )
            .unwrap();

        let refused = manager.approve_audit_request(
            request.id,
            &ApproveOptions {
                by: "supervisor-1".into(),
                materialize: true,
                auto_commit: false,
                authority_ref: None,
            },
            &state,
            &ledger,
        );
        match refused {
            Err(LedgerError::Refused(decision)) => {
                assert_eq!(decision.reason, Some(RefusalReason::MissingAuthorityRef));
            }
            other => panic!("expected a governance refusal, got {:?}", other),
        }
        assert_eq!(
            manager.get_audit_requests()[0].status,
            AuditStatus::FindingsProduced
        );
        assert!(manager.get_propose_records().is_empty());
    }

    #[test]
    fn transitions_enforce_the_state_machine() {
        let manager = AuditManager::new();
        let ledger = LedgerStore::new();
        let state = stage("plant-a", 2);

        let request = manager
            .create_audit_request(&spec(AuditOutputKind::Finding, None), &state)
            .unwrap();

        // Findings before assignment are a conflict.
        assert!(matches!(
            manager.produce_audit_findings(request.id, findings(), FindingsOptions::default()),
            Err(LedgerError::Conflict(_))
        ));
        // Approval before findings is a conflict.
        assert!(matches!(
            manager.approve_audit_request(
                request.id,
                &ApproveOptions {
                    by: "s".into(),
                    materialize: false,
                    auto_commit: false,
                    authority_ref: None,
                },
                &state,
                &ledger,
            ),
            Err(LedgerError::Conflict(_))
        ));

        manager.assign_audit_request(request.id, "auditor-2").unwrap();
        let rejected = manager
            .reject_audit_request(request.id, "supervisor-1", "out of scope")
            .unwrap();
        assert_eq!(rejected.status, AuditStatus::Rejected);
    }

    #[test]
    fn finding_only_requests_cannot_carry_drafts() {
        let manager = AuditManager::new();
        let state = stage("plant-a", 1);
        let request = manager
            .create_audit_request(&spec(AuditOutputKind::Finding, None), &state)
            .unwrap();
        manager.assign_audit_request(request.id, "auditor-2").unwrap();

        let refused = manager.produce_audit_findings(
            request.id,
            findings(),
            FindingsOptions {
                proposed_commit_draft: Some(draft()),
            },
        );
        assert!(matches!(refused, Err(LedgerError::Conflict(_))));
    }
}
