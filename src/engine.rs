//! Engine facade
//!
//! Composes the stores behind the external interface. Governance state is
//! deliberately absent here: `StageState` snapshots are caller-owned and
//! threaded through the audit and gate functions explicitly.

use crate::aggregate::branch::{HierarchyStore, KpiBinding, KpiSnapshot};
use crate::aggregate::trunk::{self, TrunkMetrics};
use crate::audit::manager::AuditManager;
use crate::error::LedgerResult;
use crate::formula::graph::GraphSummary;
use crate::ledger::replay::{self, ReplayReport};
use crate::ledger::sheet::{CellFormulaState, CommitOutcome};
use crate::ledger::store::LedgerStore;
use crate::model::{CellValue, CommitKind, CommitPayload};
use crate::router::ingest::{EventRouter, RouteReceipt};
use crate::router::registry::RouteRegistry;

/// Top-level handle over the ledger, hierarchy, router, and audit stores
pub struct Engine {
    pub ledger: LedgerStore,
    pub hierarchy: HierarchyStore,
    pub router: EventRouter,
    pub audit: AuditManager,
}

impl Engine {
    /// Engine with the standard route registry. Sheets and branches named by
    /// the registry are registered up front.
    pub fn new() -> LedgerResult<Self> {
        Self::with_registry(RouteRegistry::standard())
    }

    pub fn with_registry(registry: RouteRegistry) -> LedgerResult<Self> {
        let engine = Self {
            ledger: LedgerStore::new(),
            hierarchy: HierarchyStore::new(),
            router: EventRouter::new(registry),
            audit: AuditManager::new(),
        };
        let specs: Vec<_> = engine.router.registry().specs().cloned().collect();
        for spec in specs {
            if !engine.hierarchy.branch_ids().contains(&spec.branch_id) {
                engine.hierarchy.register_branch(&spec.branch_id)?;
            }
            engine.ledger.register_sheet(&spec.sheet_id, &spec.branch_id)?;
            engine.hierarchy.attach_sheet(&spec.branch_id, &spec.sheet_id)?;
        }
        Ok(engine)
    }

    // -------------------------------------------------------------------
    // Hierarchy setup
    // -------------------------------------------------------------------

    pub fn register_branch(&self, branch_id: &str) -> LedgerResult<()> {
        self.hierarchy.register_branch(branch_id)
    }

    pub fn register_sheet(&self, sheet_id: &str, branch_id: &str) -> LedgerResult<()> {
        self.ledger.register_sheet(sheet_id, branch_id)?;
        self.hierarchy.attach_sheet(branch_id, sheet_id)
    }

    pub fn bind_kpi(&self, branch_id: &str, binding: KpiBinding) -> LedgerResult<()> {
        self.hierarchy.bind_metric(branch_id, binding)
    }

    // -------------------------------------------------------------------
    // Cell mutation & inspection
    // -------------------------------------------------------------------

    /// Set a literal cell value; recompute and branch KPI snapshots follow
    /// synchronously, scoped to the owning branch.
    pub fn set_cell_value_deterministic(
        &self,
        sheet_id: &str,
        cell: &str,
        input: CellValue,
    ) -> LedgerResult<CommitOutcome> {
        let outcome = self.ledger.append_commit(
            sheet_id,
            cell,
            CommitKind::CellSet,
            CommitPayload::Value { value: input },
        )?;
        self.snapshot_owning_branch(sheet_id, &outcome)?;
        Ok(outcome)
    }

    /// Set a formula cell; malformed formula text is rejected before append.
    pub fn set_formula_cell(
        &self,
        sheet_id: &str,
        cell: &str,
        formula: &str,
    ) -> LedgerResult<CommitOutcome> {
        let outcome = self.ledger.append_commit(
            sheet_id,
            cell,
            CommitKind::FormulaSet,
            CommitPayload::Formula {
                text: formula.to_string(),
            },
        )?;
        self.snapshot_owning_branch(sheet_id, &outcome)?;
        Ok(outcome)
    }

    /// Clear a cell back to empty.
    pub fn clear_cell(&self, sheet_id: &str, cell: &str) -> LedgerResult<CommitOutcome> {
        let outcome =
            self.ledger
                .append_commit(sheet_id, cell, CommitKind::CellClear, CommitPayload::Empty)?;
        self.snapshot_owning_branch(sheet_id, &outcome)?;
        Ok(outcome)
    }

    pub fn get_cell_formula_state(
        &self,
        sheet_id: &str,
        cell: &str,
    ) -> LedgerResult<CellFormulaState> {
        self.ledger.cell_state(sheet_id, cell)
    }

    pub fn build_formula_dag(&self, sheet_id: &str) -> LedgerResult<GraphSummary> {
        self.ledger.dag_summary(sheet_id)
    }

    pub fn replay_sheet_from_commits(&self, sheet_id: &str) -> LedgerResult<ReplayReport> {
        replay::replay_sheet_from_commits(&self.ledger, sheet_id)
    }

    // -------------------------------------------------------------------
    // Aggregation & routing
    // -------------------------------------------------------------------

    pub fn get_trunk_metrics(&self) -> TrunkMetrics {
        trunk::get_trunk_metrics(&self.hierarchy)
    }

    pub fn branch_history(&self, branch_id: &str) -> LedgerResult<Vec<KpiSnapshot>> {
        self.hierarchy.branch_history(branch_id)
    }

    pub fn ingest_route(
        &self,
        route_id: &str,
        payload: serde_json::Value,
    ) -> LedgerResult<RouteReceipt> {
        self.router
            .ingest_route(&self.ledger, &self.hierarchy, route_id, payload)
    }

    fn snapshot_owning_branch(&self, sheet_id: &str, outcome: &CommitOutcome) -> LedgerResult<()> {
        let branch_id = self.ledger.branch_of(sheet_id)?;
        self.hierarchy
            .snapshot_if_relevant(&branch_id, sheet_id, &outcome.changed_cells, &self.ledger)?;
        Ok(())
    }
}
