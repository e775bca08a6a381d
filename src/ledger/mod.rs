//! Commit log & cell store
//!
//! Append-only per-sheet event logs, materialized cell state with synchronous
//! incremental recompute, and the replay engine that verifies the two never
//! drift apart.

pub mod replay;
pub mod sheet;
pub mod store;

pub use replay::{canonical_sheet_hash, ReplayReport};
pub use sheet::{CellFormulaState, CommitOutcome, Sheet, SheetState};
pub use store::LedgerStore;
