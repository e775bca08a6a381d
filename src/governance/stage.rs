//! Stage state and gate decisions
//!
//! `StageState` is an explicit, caller-owned snapshot threaded through every
//! call; nothing here lives in a process-wide singleton. `can_execute` and
//! `recommend_stage_unlock` are pure reads. Only `apply_committed_stage_unlock`,
//! given both a commit id and an authority reference, produces a mutated
//! snapshot — and re-applying the same commit id is an idempotent no-op.

use crate::governance::actions::{action_requirement, GateTrack};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

/// Why a gate refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    StageLocked,
    AuthorityRequired,
    MissingCommitId,
    MissingAuthorityRef,
    UnknownAction,
}

/// Pass/refusal discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateResult {
    Pass,
    Refusal,
}

/// Governance stage snapshot: per-user individual track, per-scope global
/// track, and the ledger of already-applied unlock commit ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    /// Individual track: user id -> stage
    #[serde(default)]
    pub isg_by_user: HashMap<String, u8>,
    /// Global track: operational scope -> stage
    #[serde(default)]
    pub gsg_by_scope: HashMap<String, u8>,
    /// Unlock commit ids that have already been applied (idempotency ledger)
    #[serde(default)]
    pub applied_unlocks: HashSet<String>,
}

impl StageState {
    pub fn current_stage(&self, track: GateTrack, scope: &str, user_id: &str) -> u8 {
        match track {
            GateTrack::Individual => self.isg_by_user.get(user_id).copied().unwrap_or(0),
            GateTrack::Global => self.gsg_by_scope.get(scope).copied().unwrap_or(0),
        }
    }
}

/// Full gate verdict; every refusal reports the stage gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub ok: bool,
    pub result: GateResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefusalReason>,
    pub required_stage: u8,
    pub current_stage: u8,
    pub track: GateTrack,
    pub action: String,
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            Some(reason) => write!(
                f,
                "action '{}' refused ({:?}): required stage {}, current stage {}",
                self.action, reason, self.required_stage, self.current_stage
            ),
            None => write!(f, "action '{}' permitted", self.action),
        }
    }
}

/// Pure gate check: does `(scope, user)` currently clear the gate for `action_id`?
pub fn can_execute(
    action_id: &str,
    scope: &str,
    user_id: &str,
    authority_ref: Option<&str>,
    stage_state: &StageState,
) -> GateDecision {
    let Some(requirement) = action_requirement(action_id) else {
        return GateDecision {
            ok: false,
            result: GateResult::Refusal,
            reason: Some(RefusalReason::UnknownAction),
            required_stage: 0,
            current_stage: 0,
            track: GateTrack::Global,
            action: action_id.to_string(),
        };
    };

    let current_stage = stage_state.current_stage(requirement.track, scope, user_id);
    let mut decision = GateDecision {
        ok: true,
        result: GateResult::Pass,
        reason: None,
        required_stage: requirement.required_stage,
        current_stage,
        track: requirement.track,
        action: action_id.to_string(),
    };

    if current_stage < requirement.required_stage {
        decision.ok = false;
        decision.result = GateResult::Refusal;
        decision.reason = Some(RefusalReason::StageLocked);
    } else if requirement.requires_authority
        && authority_ref.map(str::trim).filter(|a| !a.is_empty()).is_none()
    {
        decision.ok = false;
        decision.result = GateResult::Refusal;
        decision.reason = Some(RefusalReason::AuthorityRequired);
    }

    if !decision.ok {
        debug!(
            action = action_id,
            scope,
            user = user_id,
            reason = ?decision.reason,
            required = decision.required_stage,
            current = decision.current_stage,
            "gate refusal"
        );
    }
    decision
}

/// Advisory unlock recommendation. Never mutates anything: a vote or
/// recommendation alone cannot change governance state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRecommendation {
    pub scope: String,
    pub user_id: String,
    pub track: GateTrack,
    pub target_stage: u8,
    pub current_stage: u8,
    /// Always true: only a committed, authorized unlock mutates stage state
    pub commit_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

pub fn recommend_stage_unlock(
    scope: &str,
    user_id: &str,
    track: GateTrack,
    target_stage: u8,
    rationale: Option<String>,
    stage_state: &StageState,
) -> UnlockRecommendation {
    UnlockRecommendation {
        scope: scope.to_string(),
        user_id: user_id.to_string(),
        track,
        target_stage,
        current_stage: stage_state.current_stage(track, scope, user_id),
        commit_required: true,
        rationale,
    }
}

/// Request to apply a committed stage unlock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageUnlockRequest {
    pub scope: String,
    pub user_id: String,
    pub target_stage: u8,
    pub commit_id: String,
    pub authority_ref: String,
    pub track: GateTrack,
}

/// Outcome of an unlock application; `stage_state` is the (possibly unchanged)
/// successor snapshot the caller should persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageUnlockOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefusalReason>,
    pub stage_state: StageState,
}

/// Apply a committed, authorized stage unlock.
///
/// No governance change without an explicit, attributable, authorized commit:
/// both the commit id and the authority reference must be non-empty. Replaying
/// an already-applied commit id returns the snapshot unchanged.
pub fn apply_committed_stage_unlock(
    request: &StageUnlockRequest,
    stage_state: &StageState,
) -> StageUnlockOutcome {
    if request.commit_id.trim().is_empty() {
        return StageUnlockOutcome {
            ok: false,
            reason: Some(RefusalReason::MissingCommitId),
            stage_state: stage_state.clone(),
        };
    }
    if request.authority_ref.trim().is_empty() {
        return StageUnlockOutcome {
            ok: false,
            reason: Some(RefusalReason::MissingAuthorityRef),
            stage_state: stage_state.clone(),
        };
    }
    if stage_state.applied_unlocks.contains(&request.commit_id) {
        debug!(commit = %request.commit_id, "stage unlock already applied; no-op");
        return StageUnlockOutcome {
            ok: true,
            reason: None,
            stage_state: stage_state.clone(),
        };
    }

    let mut next = stage_state.clone();
    match request.track {
        GateTrack::Individual => {
            next.isg_by_user
                .insert(request.user_id.clone(), request.target_stage);
        }
        GateTrack::Global => {
            next.gsg_by_scope
                .insert(request.scope.clone(), request.target_stage);
        }
    }
    next.applied_unlocks.insert(request.commit_id.clone());

    info!(
        scope = %request.scope,
        user = %request.user_id,
        track = ?request.track,
        stage = request.target_stage,
        commit = %request.commit_id,
        authority = %request.authority_ref,
        "applied committed stage unlock"
    );
    StageUnlockOutcome {
        ok: true,
        reason: None,
        stage_state: next,
    }
}
