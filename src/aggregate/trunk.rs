//! Trunk aggregation
//!
//! Trunk metrics are derived on demand: branch samples sharing a
//! `source_metric_id` are combined with a plain sum, and every aggregate
//! publishes a contributor trace back to the originating branch, source cell,
//! and fact sheets. Every trunk number is auditable to source data.

use crate::aggregate::branch::HierarchyStore;
use crate::model::CellRef;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Provenance entry behind one trunk metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub branch_id: String,
    pub source_cell: CellRef,
    pub fact_sheet_ids: Vec<String>,
}

/// One aggregated trunk metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrunkMetric {
    pub metric_id: String,
    pub source_metric_id: String,
    pub value: f64,
    pub contributors: Vec<Contributor>,
}

/// Full trunk view plus a canonical content hash
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrunkMetrics {
    pub metrics: Vec<TrunkMetric>,
    pub hash: String,
}

/// Aggregate every branch's latest samples into trunk metrics.
///
/// The aggregation function is a fixed plain sum; only branches that have
/// actually recorded a sample for a source metric contribute, so every
/// contributor resolves to source cells that changed.
pub fn get_trunk_metrics(hierarchy: &HierarchyStore) -> TrunkMetrics {
    let mut grouped: BTreeMap<String, TrunkMetric> = BTreeMap::new();

    for branch in hierarchy.all_branches() {
        for sample in branch.latest_samples().into_values() {
            let entry = grouped
                .entry(sample.source_metric_id.clone())
                .or_insert_with(|| TrunkMetric {
                    metric_id: format!("trunk.{}", sample.source_metric_id),
                    source_metric_id: sample.source_metric_id.clone(),
                    value: 0.0,
                    contributors: Vec::new(),
                });
            entry.value += sample.value;

            // Provenance follows the sampled metric only; a binding whose value
            // was withheld from the snapshot contributed nothing and is absent.
            if let Some(binding) = branch
                .bindings
                .iter()
                .find(|b| b.metric_id == sample.metric_id)
            {
                entry.contributors.push(Contributor {
                    branch_id: branch.id.clone(),
                    source_cell: binding.cell.clone(),
                    fact_sheet_ids: binding.fact_sheet_ids.clone(),
                });
            }
        }
    }

    let metrics: Vec<TrunkMetric> = grouped.into_values().collect();
    let hash = trunk_hash(&metrics);
    TrunkMetrics { metrics, hash }
}

fn trunk_hash(metrics: &[TrunkMetric]) -> String {
    let mut hasher = Sha256::new();
    for m in metrics {
        let contributors: Vec<String> = m
            .contributors
            .iter()
            .map(|c| format!("{}:{}:{}", c.branch_id, c.source_cell, c.fact_sheet_ids.join("+")))
            .collect();
        hasher.update(
            format!(
                "{}|{}|{}|{}\n",
                m.metric_id,
                m.source_metric_id,
                m.value,
                contributors.join(",")
            )
            .as_bytes(),
        );
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::branch::KpiBinding;
    use crate::ledger::store::LedgerStore;
    use crate::model::{CellValue, CommitKind, CommitPayload};
    use pretty_assertions::assert_eq;

    fn setup_branch(
        ledger: &LedgerStore,
        hierarchy: &HierarchyStore,
        branch: &str,
        sheet: &str,
        metric: &str,
        cell: &str,
        value: f64,
    ) {
        ledger.register_sheet(sheet, branch).unwrap();
        hierarchy.register_branch(branch).unwrap();
        hierarchy.attach_sheet(branch, sheet).unwrap();
        hierarchy
            .bind_metric(
                branch,
                KpiBinding {
                    metric_id: format!("{}.{}", branch, metric),
                    source_metric_id: metric.into(),
                    sheet_id: sheet.into(),
                    cell: CellRef::parse(cell).unwrap(),
                    fact_sheet_ids: vec![sheet.into()],
                },
            )
            .unwrap();
        let changed = ledger
            .append_commit(
                sheet,
                cell,
                CommitKind::CellSet,
                CommitPayload::Value {
                    value: CellValue::Number(value),
                },
            )
            .unwrap()
            .changed_cells;
        hierarchy
            .snapshot_if_relevant(branch, sheet, &changed, ledger)
            .unwrap();
    }

    #[test]
    fn trunk_sums_branches_sharing_a_source_metric() {
        let ledger = LedgerStore::new();
        let hierarchy = HierarchyStore::new();
        setup_branch(&ledger, &hierarchy, "P2P", "p2p-req", "spend", "TOTAL", 100.0);
        setup_branch(&ledger, &hierarchy, "MFG", "mfg-wo", "spend", "TOTAL", 40.0);

        let trunk = get_trunk_metrics(&hierarchy);
        assert_eq!(trunk.metrics.len(), 1);
        let metric = &trunk.metrics[0];
        assert_eq!(metric.source_metric_id, "spend");
        assert_eq!(metric.value, 140.0);
        assert_eq!(metric.contributors.len(), 2);
    }

    #[test]
    fn every_trunk_metric_has_resolvable_provenance() {
        let ledger = LedgerStore::new();
        let hierarchy = HierarchyStore::new();
        setup_branch(&ledger, &hierarchy, "P2P", "p2p-req", "spend", "TOTAL", 55.0);

        let trunk = get_trunk_metrics(&hierarchy);
        for metric in &trunk.metrics {
            assert!(!metric.contributors.is_empty());
            for c in &metric.contributors {
                let state = ledger
                    .cell_state(&c.fact_sheet_ids[0], c.source_cell.as_str())
                    .unwrap();
                assert!(state.value.is_some(), "contributor cell must hold data");
            }
        }
    }

    fn bind(hierarchy: &HierarchyStore, branch: &str, metric: &str, sheet: &str, cell: &str) {
        hierarchy
            .bind_metric(
                branch,
                KpiBinding {
                    metric_id: metric.into(),
                    source_metric_id: "spend".into(),
                    sheet_id: sheet.into(),
                    cell: CellRef::parse(cell).unwrap(),
                    fact_sheet_ids: vec![sheet.into()],
                },
            )
            .unwrap();
    }

    fn set_and_snapshot(
        ledger: &LedgerStore,
        hierarchy: &HierarchyStore,
        branch: &str,
        sheet: &str,
        cell: &str,
        value: f64,
    ) {
        let changed = ledger
            .append_commit(
                sheet,
                cell,
                CommitKind::CellSet,
                CommitPayload::Value {
                    value: CellValue::Number(value),
                },
            )
            .unwrap()
            .changed_cells;
        hierarchy
            .snapshot_if_relevant(branch, sheet, &changed, ledger)
            .unwrap();
    }

    #[test]
    fn withheld_bindings_are_absent_from_trunk_provenance() {
        let ledger = LedgerStore::new();
        let hierarchy = HierarchyStore::new();
        ledger.register_sheet("p2p-req", "P2P").unwrap();
        hierarchy.register_branch("P2P").unwrap();
        hierarchy.attach_sheet("P2P", "p2p-req").unwrap();
        bind(&hierarchy, "P2P", "P2P.spend", "p2p-req", "TOTAL");
        bind(&hierarchy, "P2P", "P2P.cycleSpend", "p2p-req", "E1");

        // E1 enters a cycle, so its metric never lands in the snapshot.
        for (cell, text) in [("E1", "F1 + 1"), ("F1", "E1 + 1")] {
            ledger
                .append_commit(
                    "p2p-req",
                    cell,
                    CommitKind::FormulaSet,
                    CommitPayload::Formula { text: text.into() },
                )
                .unwrap();
        }
        set_and_snapshot(&ledger, &hierarchy, "P2P", "p2p-req", "TOTAL", 10.0);

        let trunk = get_trunk_metrics(&hierarchy);
        assert_eq!(trunk.metrics.len(), 1);
        let spend = &trunk.metrics[0];
        assert_eq!(spend.value, 10.0);
        assert_eq!(spend.contributors.len(), 1);
        assert_eq!(
            spend.contributors[0].source_cell,
            CellRef::parse("TOTAL").unwrap()
        );
    }

    #[test]
    fn same_source_bindings_each_contribute_to_the_sum() {
        let ledger = LedgerStore::new();
        let hierarchy = HierarchyStore::new();
        ledger.register_sheet("p2p-req", "P2P").unwrap();
        hierarchy.register_branch("P2P").unwrap();
        hierarchy.attach_sheet("P2P", "p2p-req").unwrap();
        bind(&hierarchy, "P2P", "P2P.reqSpend", "p2p-req", "A1");
        bind(&hierarchy, "P2P", "P2P.invSpend", "p2p-req", "B1");

        set_and_snapshot(&ledger, &hierarchy, "P2P", "p2p-req", "A1", 10.0);
        set_and_snapshot(&ledger, &hierarchy, "P2P", "p2p-req", "B1", 5.0);

        let trunk = get_trunk_metrics(&hierarchy);
        assert_eq!(trunk.metrics.len(), 1);
        let spend = &trunk.metrics[0];
        assert_eq!(spend.value, 15.0);
        assert_eq!(spend.contributors.len(), 2);
    }

    #[test]
    fn trunk_hash_is_deterministic() {
        let ledger = LedgerStore::new();
        let hierarchy = HierarchyStore::new();
        setup_branch(&ledger, &hierarchy, "P2P", "p2p-req", "spend", "TOTAL", 10.0);

        let a = get_trunk_metrics(&hierarchy);
        let b = get_trunk_metrics(&hierarchy);
        assert_eq!(a.hash, b.hash);
    }
}
