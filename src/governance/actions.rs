//! Action requirement registry
//!
//! Static table mapping each governed action id to its track, minimum stage,
//! and whether a non-empty authority reference is mandatory.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Governance track an action is gated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTrack {
    /// Per-user gate for personal-capability actions (preview, simulation)
    Individual,
    /// Per-scope gate for scope-wide mechanics (commit posting, policy)
    Global,
}

/// Requirement row for one action id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequirement {
    pub track: GateTrack,
    pub required_stage: u8,
    /// Global-track actions that mutate shared mechanics also demand a
    /// non-empty authority reference
    pub requires_authority: bool,
}

static ACTIONS: Lazy<HashMap<&'static str, ActionRequirement>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        "previewSimulation",
        ActionRequirement {
            track: GateTrack::Individual,
            required_stage: 1,
            requires_authority: false,
        },
    );
    table.insert(
        "whatIfForecast",
        ActionRequirement {
            track: GateTrack::Individual,
            required_stage: 2,
            requires_authority: false,
        },
    );
    table.insert(
        "auditRequestFinding",
        ActionRequirement {
            track: GateTrack::Global,
            required_stage: 1,
            requires_authority: false,
        },
    );
    table.insert(
        "auditRequestProposedCommit",
        ActionRequirement {
            track: GateTrack::Global,
            required_stage: 2,
            requires_authority: true,
        },
    );
    table.insert(
        "commitPosting",
        ActionRequirement {
            track: GateTrack::Global,
            required_stage: 2,
            requires_authority: true,
        },
    );
    table.insert(
        "policyMutation",
        ActionRequirement {
            track: GateTrack::Global,
            required_stage: 3,
            requires_authority: true,
        },
    );
    table
});

/// Look up the requirement row for an action id.
pub fn action_requirement(action_id: &str) -> Option<ActionRequirement> {
    ACTIONS.get(action_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_the_governed_actions() {
        for action in [
            "previewSimulation",
            "whatIfForecast",
            "auditRequestFinding",
            "auditRequestProposedCommit",
            "commitPosting",
            "policyMutation",
        ] {
            assert!(action_requirement(action).is_some(), "{}", action);
        }
        assert!(action_requirement("unlistedAction").is_none());
    }

    #[test]
    fn proposed_commit_audits_outrank_finding_audits() {
        let finding = action_requirement("auditRequestFinding").unwrap();
        let proposed = action_requirement("auditRequestProposedCommit").unwrap();
        assert!(proposed.required_stage > finding.required_stage);
        assert!(proposed.requires_authority);
        assert!(!finding.requires_authority);
    }
}
