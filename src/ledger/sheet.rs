//! Sheet state and commit application
//!
//! `SheetState` is the materialized side of a sheet: cell map, cached formula
//! ASTs, and the dependency graph. Applying a commit mutates exactly one cell's
//! raw input and then recomputes the cell plus its transitive dependents — never
//! the whole sheet. The same application path serves live mutation and replay,
//! which is what makes the replay hash comparison meaningful.

use crate::error::{LedgerError, LedgerResult};
use crate::formula::eval::{evaluate, EvalOutcome, ResolvedRef};
use crate::formula::graph::DependencyGraph;
use crate::formula::parser::{parse_formula, Expr};
use crate::model::{Cell, CellInput, CellRef, CellValue, Commit, CommitKind, CommitPayload, FormulaStatus};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Result of appending one commit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub commit_id: u64,
    /// Cells whose materialized record changed (input, value, or status)
    pub changed_cells: BTreeSet<CellRef>,
}

/// Cell state as reported at the API boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellFormulaState {
    pub formula_state: FormulaStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CellValue>,
}

/// Materialized cell state of one sheet
#[derive(Debug, Clone, Default)]
pub struct SheetState {
    cells: BTreeMap<CellRef, Cell>,
    formulas: BTreeMap<CellRef, Expr>,
    graph: DependencyGraph,
}

impl SheetState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cells(&self) -> &BTreeMap<CellRef, Cell> {
        &self.cells
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn cell_state(&self, cell: &CellRef) -> CellFormulaState {
        match self.cells.get(cell) {
            Some(c) => CellFormulaState {
                formula_state: c.status,
                value: c.value.clone(),
            },
            None => CellFormulaState {
                formula_state: FormulaStatus::Ok,
                value: None,
            },
        }
    }

    /// Apply one commit and recompute its dependents.
    ///
    /// The log is validated before anything is appended, so an unparsable
    /// formula here means the log itself is corrupt — a fatal condition.
    pub fn apply_commit(&mut self, commit: &Commit) -> LedgerResult<BTreeSet<CellRef>> {
        let target = commit.cell.clone();
        let before_target = self.cells.get(&target).cloned();

        match (&commit.kind, &commit.payload) {
            (CommitKind::CellSet, CommitPayload::Value { value }) => {
                self.graph.clear_edges(&target);
                self.formulas.remove(&target);
                self.cells.insert(
                    target.clone(),
                    Cell {
                        input: CellInput::Literal {
                            value: value.clone(),
                        },
                        value: Some(value.clone()),
                        status: FormulaStatus::Ok,
                        last_commit: commit.id,
                    },
                );
            }
            (CommitKind::CellClear, CommitPayload::Empty) => {
                self.graph.clear_edges(&target);
                self.formulas.remove(&target);
                self.cells.insert(target.clone(), Cell::empty(commit.id));
            }
            (CommitKind::FormulaSet, CommitPayload::Formula { text }) => {
                let expr = parse_formula(text).map_err(|e| {
                    LedgerError::Fatal(format!(
                        "commit {} on sheet '{}' carries unparsable formula: {}",
                        commit.id, commit.sheet_id, e
                    ))
                })?;
                self.graph.set_edges(&target, expr.references());
                self.formulas.insert(target.clone(), expr);
                self.cells.insert(
                    target.clone(),
                    Cell {
                        input: CellInput::Formula { text: text.clone() },
                        value: None,
                        status: FormulaStatus::Ok,
                        last_commit: commit.id,
                    },
                );
            }
            (kind, _) => {
                return Err(LedgerError::Fatal(format!(
                    "commit {} on sheet '{}' has payload mismatching kind {:?}",
                    commit.id, commit.sheet_id, kind
                )));
            }
        }

        // Scoped recompute: the committed cell plus everything downstream of it.
        let mut affected = BTreeSet::new();
        affected.insert(target.clone());
        affected.extend(self.graph.dependents_closure(&affected.clone()));

        let before: BTreeMap<CellRef, Option<Cell>> = affected
            .iter()
            .map(|c| {
                let prior = if *c == target {
                    before_target.clone()
                } else {
                    self.cells.get(c).cloned()
                };
                (c.clone(), prior)
            })
            .collect();

        self.recompute(&affected);

        let changed = affected
            .into_iter()
            .filter(|c| before.get(c).map(Option::as_ref) != Some(self.cells.get(c)))
            .collect();
        Ok(changed)
    }

    /// Recompute formula cells within `affected`: tainted cells are withheld as
    /// `Indeterminate`, the rest evaluate in topological order.
    fn recompute(&mut self, affected: &BTreeSet<CellRef>) {
        let tainted = self.graph.tainted();

        for cell in affected {
            if tainted.contains(cell) {
                if let Some(record) = self.cells.get_mut(cell) {
                    record.status = FormulaStatus::Indeterminate;
                    record.value = None;
                }
            }
        }

        let evaluable: BTreeSet<CellRef> = affected
            .iter()
            .filter(|c| self.formulas.contains_key(*c) && !tainted.contains(*c))
            .cloned()
            .collect();

        for cell in self.graph.topo_order(&evaluable) {
            let Some(expr) = self.formulas.get(&cell) else {
                continue;
            };
            let outcome = {
                let cells = &self.cells;
                evaluate(expr, &|r: &CellRef| match cells.get(r) {
                    None => ResolvedRef::Empty,
                    Some(c) => match (c.status, &c.value) {
                        (FormulaStatus::Error, _) => ResolvedRef::Faulted,
                        (FormulaStatus::Indeterminate, _) => ResolvedRef::Withheld,
                        (FormulaStatus::Ok, Some(v)) => ResolvedRef::Value(v.clone()),
                        (FormulaStatus::Ok, None) => ResolvedRef::Empty,
                    },
                })
            };
            if let Some(record) = self.cells.get_mut(&cell) {
                match outcome {
                    EvalOutcome::Value(v) => {
                        record.status = FormulaStatus::Ok;
                        record.value = Some(v);
                    }
                    EvalOutcome::Fault(_) => {
                        record.status = FormulaStatus::Error;
                        record.value = None;
                    }
                }
            }
        }
    }
}

/// A sheet: append-only commit log plus materialized state.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub id: String,
    pub branch_id: String,
    pub log: Vec<Commit>,
    pub state: SheetState,
    pub next_commit_id: u64,
    /// Set after a replay mismatch; halted sheets refuse further commits
    pub halted: bool,
}

impl Sheet {
    pub fn new(id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            branch_id: branch_id.into(),
            log: Vec::new(),
            state: SheetState::new(),
            next_commit_id: 1,
            halted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn cell(s: &str) -> CellRef {
        CellRef::parse(s).unwrap()
    }

    fn apply(state: &mut SheetState, id: u64, target: &str, kind: CommitKind, payload: CommitPayload) {
        let commit = Commit {
            id,
            sheet_id: "s".into(),
            cell: cell(target),
            kind,
            payload,
            timestamp: Utc::now(),
        };
        state.apply_commit(&commit).unwrap();
    }

    fn set_number(state: &mut SheetState, id: u64, target: &str, n: f64) {
        apply(
            state,
            id,
            target,
            CommitKind::CellSet,
            CommitPayload::Value {
                value: CellValue::Number(n),
            },
        );
    }

    fn set_formula(state: &mut SheetState, id: u64, target: &str, text: &str) {
        apply(
            state,
            id,
            target,
            CommitKind::FormulaSet,
            CommitPayload::Formula { text: text.into() },
        );
    }

    #[test]
    fn dependents_recompute_incrementally() {
        let mut state = SheetState::new();
        set_number(&mut state, 1, "A1", 2.0);
        set_formula(&mut state, 2, "B1", "A1 * 10");
        set_formula(&mut state, 3, "C1", "B1 + 1");

        assert_eq!(
            state.cell_state(&cell("C1")).value,
            Some(CellValue::Number(21.0))
        );

        set_number(&mut state, 4, "A1", 5.0);
        assert_eq!(
            state.cell_state(&cell("B1")).value,
            Some(CellValue::Number(50.0))
        );
        assert_eq!(
            state.cell_state(&cell("C1")).value,
            Some(CellValue::Number(51.0))
        );
    }

    #[test]
    fn cycle_withholds_values_and_recovers() {
        let mut state = SheetState::new();
        set_formula(&mut state, 1, "E1", "F1 + 1");
        set_formula(&mut state, 2, "F1", "E1 + 1");

        for c in ["E1", "F1"] {
            let s = state.cell_state(&cell(c));
            assert_eq!(s.formula_state, FormulaStatus::Indeterminate, "{}", c);
            assert_eq!(s.value, None, "{} must withhold its value", c);
        }
        assert_eq!(state.graph().summary().cycle_count, 1);

        // Breaking the cycle restores Ok on both cells deterministically.
        apply(&mut state, 3, "F1", CommitKind::CellClear, CommitPayload::Empty);
        let e1 = state.cell_state(&cell("E1"));
        assert_eq!(e1.formula_state, FormulaStatus::Ok);
        assert_eq!(e1.value, Some(CellValue::Number(1.0)));
        assert_eq!(state.graph().summary().cycle_count, 0);
    }

    #[test]
    fn cycle_recovery_is_edit_order_independent() {
        // Same cycle, broken by editing the *other* cell.
        let mut state = SheetState::new();
        set_formula(&mut state, 1, "E1", "F1 + 1");
        set_formula(&mut state, 2, "F1", "E1 + 1");
        set_number(&mut state, 3, "E1", 7.0);

        let f1 = state.cell_state(&cell("F1"));
        assert_eq!(f1.formula_state, FormulaStatus::Ok);
        assert_eq!(f1.value, Some(CellValue::Number(8.0)));
    }

    #[test]
    fn error_is_distinct_from_indeterminate() {
        let mut state = SheetState::new();
        apply(
            &mut state,
            1,
            "A1",
            CommitKind::CellSet,
            CommitPayload::Value {
                value: CellValue::Text("label".into()),
            },
        );
        set_formula(&mut state, 2, "B1", "A1 + 1");
        set_formula(&mut state, 3, "C1", "1 / D1");

        assert_eq!(
            state.cell_state(&cell("B1")).formula_state,
            FormulaStatus::Error
        );
        // D1 is empty -> reads as zero -> division fault.
        assert_eq!(
            state.cell_state(&cell("C1")).formula_state,
            FormulaStatus::Error
        );
    }

    #[test]
    fn downstream_of_error_is_error_not_indeterminate() {
        let mut state = SheetState::new();
        apply(
            &mut state,
            1,
            "A1",
            CommitKind::CellSet,
            CommitPayload::Value {
                value: CellValue::Text("x".into()),
            },
        );
        set_formula(&mut state, 2, "B1", "A1 * 2");
        set_formula(&mut state, 3, "C1", "B1 + 1");

        assert_eq!(
            state.cell_state(&cell("C1")).formula_state,
            FormulaStatus::Error
        );
    }

    #[test]
    fn changed_cells_cover_the_recomputed_closure() {
        let mut state = SheetState::new();
        set_number(&mut state, 1, "A1", 1.0);
        set_formula(&mut state, 2, "B1", "A1 + 1");

        let commit = Commit {
            id: 3,
            sheet_id: "s".into(),
            cell: cell("A1"),
            kind: CommitKind::CellSet,
            payload: CommitPayload::Value {
                value: CellValue::Number(9.0),
            },
            timestamp: Utc::now(),
        };
        let changed = state.apply_commit(&commit).unwrap();
        assert_eq!(changed, [cell("A1"), cell("B1")].into_iter().collect());
    }
}
