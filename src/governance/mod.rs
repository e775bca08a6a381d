//! Stage gate authority
//!
//! Two independent governance tracks (individual and global) decide which
//! actions may execute. Checks are pure reads over caller-owned `StageState`
//! snapshots; the only mutation path is an explicit, attributable, authorized
//! commit.

pub mod actions;
pub mod stage;

pub use actions::{action_requirement, ActionRequirement, GateTrack};
pub use stage::{
    apply_committed_stage_unlock, can_execute, recommend_stage_unlock, GateDecision, GateResult,
    RefusalReason, StageState, StageUnlockOutcome, StageUnlockRequest, UnlockRecommendation,
};
