//! Replay engine
//!
//! Rebuilds a sheet from nothing but its commit log, using the identical apply
//! path as live mutation, then compares canonical SHA-256 hashes of the two cell
//! maps. Equality is the core consistency invariant; a mismatch is fatal and
//! halts the sheet.

use crate::error::LedgerResult;
use crate::ledger::sheet::SheetState;
use crate::ledger::store::LedgerStore;
use crate::model::{Cell, CellRef};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{error, info};

/// Result of a replay comparison
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub sheet_id: String,
    pub replay_hash: String,
    pub live_hash: String,
    pub matches_live: bool,
    pub replay_state: BTreeMap<CellRef, Cell>,
    pub live_state: BTreeMap<CellRef, Cell>,
}

/// Canonical content hash of a sheet's cell map.
///
/// One line per cell in sorted reference order:
/// `ref|input|status|value|last_commit`. The scheme is fixed; changing it would
/// invalidate every historical replay comparison.
pub fn canonical_sheet_hash(state: &SheetState) -> String {
    let mut hasher = Sha256::new();
    for (cell_ref, cell) in state.cells() {
        let value = cell
            .value
            .as_ref()
            .map(|v| v.canonical())
            .unwrap_or_else(|| "-".to_string());
        hasher.update(
            format!(
                "{}|{}|{}|{}|{}\n",
                cell_ref,
                cell.input.canonical(),
                cell.status.as_str(),
                value,
                cell.last_commit
            )
            .as_bytes(),
        );
    }
    format!("{:x}", hasher.finalize())
}

/// Replay a sheet's commit log from an empty store and compare against the live
/// materialized state. A mismatch halts the sheet; it is never reconciled here.
pub fn replay_sheet_from_commits(
    store: &LedgerStore,
    sheet_id: &str,
) -> LedgerResult<ReplayReport> {
    let live = store.snapshot(sheet_id)?;

    let mut replayed = SheetState::new();
    for commit in &live.log {
        replayed.apply_commit(commit)?;
    }

    let replay_hash = canonical_sheet_hash(&replayed);
    let live_hash = canonical_sheet_hash(&live.state);
    let matches_live = replay_hash == live_hash;

    if matches_live {
        info!(sheet = %sheet_id, commits = live.log.len(), hash = %live_hash, "replay verified");
    } else {
        error!(
            sheet = %sheet_id,
            replay_hash = %replay_hash,
            live_hash = %live_hash,
            "replay hash mismatch; halting sheet"
        );
        store.halt(sheet_id)?;
    }

    Ok(ReplayReport {
        sheet_id: sheet_id.to_string(),
        replay_hash,
        live_hash,
        matches_live,
        replay_state: replayed.cells().clone(),
        live_state: live.state.cells().clone(),
    })
}
