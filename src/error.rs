//! Error handling module
//!
//! Provides the unified error taxonomy for the ledger core. Expected refusals
//! (governance denials, malformed payloads, unknown routes) are ordinary data;
//! fatal variants mark broken internal invariants and halt the affected sheet.

use crate::governance::GateDecision;
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Expected governance denial; carries the full gate decision so the caller
    /// can see the required vs. current stage.
    #[error("governance refusal: {0}")]
    Refused(Box<GateDecision>),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unknown route: {0}")]
    UnknownRoute(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The sheet failed a replay comparison earlier; all further commits to it
    /// are refused until an operator intervenes.
    #[error("sheet '{0}' is halted after a replay mismatch")]
    SheetHalted(String),

    /// Broken internal invariant (replay hash mismatch, double-applied commit).
    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Helper function to create a malformed-payload error
pub fn malformed(msg: impl Into<String>) -> LedgerError {
    LedgerError::MalformedPayload(msg.into())
}

/// Helper function to create a not found error
pub fn not_found(msg: impl Into<String>) -> LedgerError {
    LedgerError::NotFound(msg.into())
}

/// Helper function to create a conflict error
pub fn conflict(msg: impl Into<String>) -> LedgerError {
    LedgerError::Conflict(msg.into())
}
