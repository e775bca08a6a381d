//! Commit records
//!
//! A commit is a single, ordered, applied mutation in a sheet's append-only log.
//! Log position is the sole source of causal order within a sheet.

use crate::error::{malformed, LedgerError};
use crate::model::{CellRef, CellValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of mutation a commit carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    CellSet,
    CellClear,
    FormulaSet,
}

/// Payload of a commit; must agree with its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitPayload {
    Value { value: CellValue },
    Empty,
    Formula { text: String },
}

/// A single applied mutation in a sheet's log.
///
/// Commit ids are `u64` sequence numbers, unique and monotonically increasing
/// within their sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: u64,
    pub sheet_id: String,
    pub cell: CellRef,
    pub kind: CommitKind,
    pub payload: CommitPayload,
    pub timestamp: DateTime<Utc>,
}

impl Commit {
    /// Reject kind/payload mismatches before anything reaches the log.
    pub fn validate_shape(kind: CommitKind, payload: &CommitPayload) -> Result<(), LedgerError> {
        let ok = matches!(
            (kind, payload),
            (CommitKind::CellSet, CommitPayload::Value { .. })
                | (CommitKind::CellClear, CommitPayload::Empty)
                | (CommitKind::FormulaSet, CommitPayload::Formula { .. })
        );
        if ok {
            Ok(())
        } else {
            Err(malformed(format!(
                "payload does not match commit kind {:?}",
                kind
            )))
        }
    }
}
