//! Ledger store
//!
//! Thread-safe store of sheets keyed by id. All validation happens before a
//! commit is appended, so the log never contains an unparsable entry. Commits to
//! one sheet are applied atomically in log order; different sheets never
//! coordinate.

use crate::error::{conflict, malformed, not_found, LedgerError, LedgerResult};
use crate::formula::graph::GraphSummary;
use crate::formula::parser::parse_formula;
use crate::ledger::sheet::{CellFormulaState, CommitOutcome, Sheet};
use crate::model::{CellRef, Commit, CommitKind, CommitPayload};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Thread-safe sheet store
pub struct LedgerStore {
    sheets: RwLock<BTreeMap<String, Sheet>>,
}

fn read_sheets(lock: &RwLock<BTreeMap<String, Sheet>>) -> RwLockReadGuard<'_, BTreeMap<String, Sheet>> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_sheets(lock: &RwLock<BTreeMap<String, Sheet>>) -> RwLockWriteGuard<'_, BTreeMap<String, Sheet>> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            sheets: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a new, empty sheet under its owning branch.
    pub fn register_sheet(
        &self,
        sheet_id: impl Into<String>,
        branch_id: impl Into<String>,
    ) -> LedgerResult<()> {
        let sheet_id = sheet_id.into();
        let branch_id = branch_id.into();
        let mut sheets = write_sheets(&self.sheets);
        if sheets.contains_key(&sheet_id) {
            return Err(conflict(format!("sheet '{}' already exists", sheet_id)));
        }
        info!(sheet = %sheet_id, branch = %branch_id, "registered sheet");
        sheets.insert(sheet_id.clone(), Sheet::new(sheet_id, branch_id));
        Ok(())
    }

    /// Append one commit: validate, log, apply, and recompute dependents.
    pub fn append_commit(
        &self,
        sheet_id: &str,
        cell: &str,
        kind: CommitKind,
        payload: CommitPayload,
    ) -> LedgerResult<CommitOutcome> {
        let cell = CellRef::parse(cell)?;
        Commit::validate_shape(kind, &payload)?;
        if let CommitPayload::Formula { text } = &payload {
            parse_formula(text)
                .map_err(|e| malformed(format!("formula '{}' rejected: {}", text, e)))?;
        }

        let mut sheets = write_sheets(&self.sheets);
        let sheet = sheets
            .get_mut(sheet_id)
            .ok_or_else(|| not_found(format!("sheet '{}' not found", sheet_id)))?;
        if sheet.halted {
            return Err(LedgerError::SheetHalted(sheet_id.to_string()));
        }

        let commit = Commit {
            id: sheet.next_commit_id,
            sheet_id: sheet_id.to_string(),
            cell,
            kind,
            payload,
            timestamp: Utc::now(),
        };
        let changed_cells = sheet.state.apply_commit(&commit)?;
        sheet.log.push(commit.clone());
        sheet.next_commit_id += 1;

        debug!(
            sheet = %sheet_id,
            commit = commit.id,
            cell = %commit.cell,
            changed = changed_cells.len(),
            "applied commit"
        );
        Ok(CommitOutcome {
            commit_id: commit.id,
            changed_cells,
        })
    }

    /// Formula state and value of one cell (missing cells read as empty/Ok).
    pub fn cell_state(&self, sheet_id: &str, cell: &str) -> LedgerResult<CellFormulaState> {
        let cell = CellRef::parse(cell)?;
        let sheets = read_sheets(&self.sheets);
        let sheet = sheets
            .get(sheet_id)
            .ok_or_else(|| not_found(format!("sheet '{}' not found", sheet_id)))?;
        Ok(sheet.state.cell_state(&cell))
    }

    /// Dependency graph shape for one sheet.
    pub fn dag_summary(&self, sheet_id: &str) -> LedgerResult<GraphSummary> {
        let sheets = read_sheets(&self.sheets);
        let sheet = sheets
            .get(sheet_id)
            .ok_or_else(|| not_found(format!("sheet '{}' not found", sheet_id)))?;
        Ok(sheet.state.graph().summary())
    }

    /// Full commit log of one sheet, in application order.
    pub fn commit_log(&self, sheet_id: &str) -> LedgerResult<Vec<Commit>> {
        let sheets = read_sheets(&self.sheets);
        let sheet = sheets
            .get(sheet_id)
            .ok_or_else(|| not_found(format!("sheet '{}' not found", sheet_id)))?;
        Ok(sheet.log.clone())
    }

    /// Owning branch of a sheet.
    pub fn branch_of(&self, sheet_id: &str) -> LedgerResult<String> {
        let sheets = read_sheets(&self.sheets);
        let sheet = sheets
            .get(sheet_id)
            .ok_or_else(|| not_found(format!("sheet '{}' not found", sheet_id)))?;
        Ok(sheet.branch_id.clone())
    }

    /// Clone of one sheet (log + materialized state), for replay comparison.
    pub fn snapshot(&self, sheet_id: &str) -> LedgerResult<Sheet> {
        let sheets = read_sheets(&self.sheets);
        sheets
            .get(sheet_id)
            .cloned()
            .ok_or_else(|| not_found(format!("sheet '{}' not found", sheet_id)))
    }

    pub fn sheet_ids(&self) -> Vec<String> {
        read_sheets(&self.sheets).keys().cloned().collect()
    }

    /// Halt a sheet after a fatal consistency defect. Halted sheets refuse all
    /// further commits; nothing in the core un-halts them.
    pub fn halt(&self, sheet_id: &str) -> LedgerResult<()> {
        let mut sheets = write_sheets(&self.sheets);
        let sheet = sheets
            .get_mut(sheet_id)
            .ok_or_else(|| not_found(format!("sheet '{}' not found", sheet_id)))?;
        sheet.halted = true;
        Ok(())
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
