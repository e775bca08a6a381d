//! Core data model
//!
//! Cells, values, formula statuses, and commits — the vocabulary shared by the
//! ledger, the evaluator, and the aggregation layers.

mod commit;

pub use commit::{Commit, CommitKind, CommitPayload};

use crate::error::{malformed, LedgerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated cell reference (uppercase identifier such as `E1`, `REQ7`, `TOTAL`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellRef(String);

impl CellRef {
    /// Parse and validate a cell reference.
    ///
    /// References must start with an ASCII uppercase letter and contain only
    /// uppercase letters, digits, and underscores. Anything else is rejected
    /// before it can reach a commit log.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let mut chars = raw.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_uppercase() => {
                chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            }
            _ => false,
        };
        if !valid {
            return Err(malformed(format!("invalid cell reference '{}'", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An evaluated cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Canonical string form used by the replay hash
    pub fn canonical(&self) -> String {
        match self {
            CellValue::Number(n) => format!("N:{}", n),
            CellValue::Text(s) => format!("T:{}", s),
        }
    }
}

/// Raw input stored in a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellInput {
    Empty,
    Literal { value: CellValue },
    Formula { text: String },
}

impl CellInput {
    /// Canonical string form used by the replay hash
    pub fn canonical(&self) -> String {
        match self {
            CellInput::Empty => "E".to_string(),
            CellInput::Literal { value } => format!("L:{}", value.canonical()),
            CellInput::Formula { text } => format!("F:{}", text),
        }
    }
}

/// Tri-state formula status.
///
/// `Indeterminate` means the cell sits inside a reference cycle (or depends on
/// one) and its value is withheld — never stale, never zero. `Error` is a local
/// evaluation fault, distinct from a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaStatus {
    Ok,
    Indeterminate,
    Error,
}

impl FormulaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaStatus::Ok => "ok",
            FormulaStatus::Indeterminate => "indeterminate",
            FormulaStatus::Error => "error",
        }
    }
}

/// A materialized cell: raw input, evaluated value, status, and the id of the
/// commit that last directly touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub input: CellInput,
    /// Evaluated value; `None` when empty, withheld (`Indeterminate`), or faulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CellValue>,
    pub status: FormulaStatus,
    pub last_commit: u64,
}

impl Cell {
    pub fn empty(last_commit: u64) -> Self {
        Self {
            input: CellInput::Empty,
            value: None,
            status: FormulaStatus::Ok,
            last_commit,
        }
    }
}
