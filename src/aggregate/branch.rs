//! Branch KPI history
//!
//! Each branch owns a set of KPI bindings (metric -> source cell on a child
//! sheet) and an append-only history of snapshots. A snapshot is appended only
//! when a commit changes a bound cell of that branch — recompute in one branch
//! never touches another branch's history.

use crate::error::{conflict, not_found, LedgerResult};
use crate::ledger::store::LedgerStore;
use crate::model::{CellRef, CellValue, FormulaStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Binding from a branch KPI metric to its source cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiBinding {
    pub metric_id: String,
    /// Shared id that the trunk aggregates across branches
    pub source_metric_id: String,
    pub sheet_id: String,
    pub cell: CellRef,
    /// Fact sheets backing this metric, recorded in provenance traces
    pub fact_sheet_ids: Vec<String>,
}

/// One resolved metric value inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub metric_id: String,
    pub source_metric_id: String,
    pub value: f64,
}

/// Append-only KPI history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: Vec<MetricSample>,
}

/// An aggregation node owning child sheets and a KPI history
#[derive(Debug, Clone)]
pub struct Branch {
    pub id: String,
    pub sheet_ids: Vec<String>,
    pub bindings: Vec<KpiBinding>,
    pub history: Vec<KpiSnapshot>,
}

impl Branch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sheet_ids: Vec::new(),
            bindings: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Resolved samples in the latest snapshot, keyed by metric id. A branch
    /// may carry several metrics feeding the same source metric; each keeps its
    /// own sample.
    pub fn latest_samples(&self) -> BTreeMap<String, MetricSample> {
        let mut out = BTreeMap::new();
        if let Some(snapshot) = self.history.last() {
            for sample in &snapshot.metrics {
                out.insert(sample.metric_id.clone(), sample.clone());
            }
        }
        out
    }
}

/// Thread-safe store of branches
pub struct HierarchyStore {
    branches: RwLock<BTreeMap<String, Branch>>,
}

fn read_branches(
    lock: &RwLock<BTreeMap<String, Branch>>,
) -> RwLockReadGuard<'_, BTreeMap<String, Branch>> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_branches(
    lock: &RwLock<BTreeMap<String, Branch>>,
) -> RwLockWriteGuard<'_, BTreeMap<String, Branch>> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl HierarchyStore {
    pub fn new() -> Self {
        Self {
            branches: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register_branch(&self, branch_id: impl Into<String>) -> LedgerResult<()> {
        let branch_id = branch_id.into();
        let mut branches = write_branches(&self.branches);
        if branches.contains_key(&branch_id) {
            return Err(conflict(format!("branch '{}' already exists", branch_id)));
        }
        branches.insert(branch_id.clone(), Branch::new(branch_id));
        Ok(())
    }

    pub fn attach_sheet(&self, branch_id: &str, sheet_id: impl Into<String>) -> LedgerResult<()> {
        let mut branches = write_branches(&self.branches);
        let branch = branches
            .get_mut(branch_id)
            .ok_or_else(|| not_found(format!("branch '{}' not found", branch_id)))?;
        branch.sheet_ids.push(sheet_id.into());
        Ok(())
    }

    pub fn bind_metric(&self, branch_id: &str, binding: KpiBinding) -> LedgerResult<()> {
        let mut branches = write_branches(&self.branches);
        let branch = branches
            .get_mut(branch_id)
            .ok_or_else(|| not_found(format!("branch '{}' not found", branch_id)))?;
        if branch.bindings.iter().any(|b| b.metric_id == binding.metric_id) {
            return Err(conflict(format!(
                "metric '{}' already bound on branch '{}'",
                binding.metric_id, branch_id
            )));
        }
        branch.bindings.push(binding);
        Ok(())
    }

    /// Append a KPI snapshot if any changed cell on `sheet_id` backs one of this
    /// branch's metrics. Returns whether a snapshot was appended. Metrics whose
    /// source cell is currently withheld or faulted are omitted from the
    /// snapshot rather than recorded with a stale number.
    pub fn snapshot_if_relevant(
        &self,
        branch_id: &str,
        sheet_id: &str,
        changed: &BTreeSet<CellRef>,
        ledger: &LedgerStore,
    ) -> LedgerResult<bool> {
        let mut branches = write_branches(&self.branches);
        let branch = branches
            .get_mut(branch_id)
            .ok_or_else(|| not_found(format!("branch '{}' not found", branch_id)))?;

        let relevant = branch
            .bindings
            .iter()
            .any(|b| b.sheet_id == sheet_id && changed.contains(&b.cell));
        if !relevant {
            return Ok(false);
        }

        let mut metrics = Vec::new();
        for binding in &branch.bindings {
            let state = ledger.cell_state(&binding.sheet_id, binding.cell.as_str())?;
            if state.formula_state != FormulaStatus::Ok {
                continue;
            }
            if let Some(CellValue::Number(value)) = state.value {
                metrics.push(MetricSample {
                    metric_id: binding.metric_id.clone(),
                    source_metric_id: binding.source_metric_id.clone(),
                    value,
                });
            }
        }

        branch.history.push(KpiSnapshot {
            timestamp: Utc::now(),
            metrics,
        });
        info!(
            branch = %branch_id,
            sheet = %sheet_id,
            snapshots = branch.history.len(),
            "appended KPI snapshot"
        );
        Ok(true)
    }

    pub fn branch_history(&self, branch_id: &str) -> LedgerResult<Vec<KpiSnapshot>> {
        let branches = read_branches(&self.branches);
        branches
            .get(branch_id)
            .map(|b| b.history.clone())
            .ok_or_else(|| not_found(format!("branch '{}' not found", branch_id)))
    }

    pub fn branch_ids(&self) -> Vec<String> {
        read_branches(&self.branches).keys().cloned().collect()
    }

    /// Clone of every branch, in id order (trunk aggregation input).
    pub fn all_branches(&self) -> Vec<Branch> {
        read_branches(&self.branches).values().cloned().collect()
    }
}

impl Default for HierarchyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitKind, CommitPayload};
    use pretty_assertions::assert_eq;

    fn binding(metric: &str, source: &str, sheet: &str, cell: &str) -> KpiBinding {
        KpiBinding {
            metric_id: metric.into(),
            source_metric_id: source.into(),
            sheet_id: sheet.into(),
            cell: CellRef::parse(cell).unwrap(),
            fact_sheet_ids: vec![sheet.into()],
        }
    }

    fn set_number(ledger: &LedgerStore, sheet: &str, cell: &str, n: f64) -> BTreeSet<CellRef> {
        ledger
            .append_commit(
                sheet,
                cell,
                CommitKind::CellSet,
                CommitPayload::Value {
                    value: CellValue::Number(n),
                },
            )
            .unwrap()
            .changed_cells
    }

    #[test]
    fn snapshot_appends_only_on_bound_cell_change() {
        let ledger = LedgerStore::new();
        let hierarchy = HierarchyStore::new();
        ledger.register_sheet("s1", "b1").unwrap();
        hierarchy.register_branch("b1").unwrap();
        hierarchy.attach_sheet("b1", "s1").unwrap();
        hierarchy
            .bind_metric("b1", binding("b1.spend", "spend", "s1", "TOTAL"))
            .unwrap();

        let changed = set_number(&ledger, "s1", "OTHER", 5.0);
        assert!(!hierarchy
            .snapshot_if_relevant("b1", "s1", &changed, &ledger)
            .unwrap());
        assert_eq!(hierarchy.branch_history("b1").unwrap().len(), 0);

        let changed = set_number(&ledger, "s1", "TOTAL", 42.0);
        assert!(hierarchy
            .snapshot_if_relevant("b1", "s1", &changed, &ledger)
            .unwrap());

        let history = hierarchy.branch_history("b1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].metrics[0].value, 42.0);
    }

    #[test]
    fn withheld_metrics_are_omitted_not_stale() {
        let ledger = LedgerStore::new();
        let hierarchy = HierarchyStore::new();
        ledger.register_sheet("s1", "b1").unwrap();
        hierarchy.register_branch("b1").unwrap();
        hierarchy
            .bind_metric("b1", binding("b1.spend", "spend", "s1", "E1"))
            .unwrap();

        // E1 enters a cycle: its metric must be withheld from the snapshot.
        ledger
            .append_commit(
                "s1",
                "E1",
                CommitKind::FormulaSet,
                CommitPayload::Formula {
                    text: "F1 + 1".into(),
                },
            )
            .unwrap();
        let changed = ledger
            .append_commit(
                "s1",
                "F1",
                CommitKind::FormulaSet,
                CommitPayload::Formula {
                    text: "E1 + 1".into(),
                },
            )
            .unwrap()
            .changed_cells;

        assert!(hierarchy
            .snapshot_if_relevant("b1", "s1", &changed, &ledger)
            .unwrap());
        let history = hierarchy.branch_history("b1").unwrap();
        assert!(history[0].metrics.is_empty());
    }
}
