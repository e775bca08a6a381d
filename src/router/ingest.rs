//! Route ingestion
//!
//! Applies a routed event's cell commits to its target sheet, recomputes, and
//! appends a KPI snapshot on the owning branch only. Ingestion is idempotent:
//! a replayed key returns the original receipt and appends nothing.

use crate::aggregate::branch::HierarchyStore;
use crate::error::LedgerResult;
use crate::ledger::store::LedgerStore;
use crate::model::CellRef;
use crate::router::registry::{RouteEvent, RouteRegistry};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Receipt for one ingested (or replayed) event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteReceipt {
    pub route_id: String,
    pub sheet_id: String,
    pub branch_id: String,
    pub idempotency_key: String,
    pub commit_ids: Vec<u64>,
    pub snapshot_appended: bool,
    /// True when this key was already ingested and nothing new was applied
    pub duplicate: bool,
}

/// Event router with idempotency ledger
pub struct EventRouter {
    registry: RouteRegistry,
    receipts: RwLock<HashMap<String, RouteReceipt>>,
}

impl EventRouter {
    pub fn new(registry: RouteRegistry) -> Self {
        Self {
            registry,
            receipts: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Resolve, validate, and apply one external event.
    pub fn ingest_route(
        &self,
        ledger: &LedgerStore,
        hierarchy: &HierarchyStore,
        route_id: &str,
        payload: serde_json::Value,
    ) -> LedgerResult<RouteReceipt> {
        let spec = self.registry.resolve(route_id)?.clone();
        let event = RouteEvent::parse(route_id, payload)?;
        let key = event.idempotency_key().to_string();

        // The write lock spans the duplicate check and the application, so two
        // concurrent ingestions of one key cannot both append.
        let mut receipts = self
            .receipts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(receipt) = receipts.get(&key) {
            debug!(route = route_id, key = %key, "duplicate ingestion; returning stored receipt");
            let mut replay = receipt.clone();
            replay.duplicate = true;
            return Ok(replay);
        }

        let mut commit_ids = Vec::new();
        let mut changed: BTreeSet<CellRef> = BTreeSet::new();
        for (cell, kind, commit_payload) in event.cell_commits() {
            let outcome = ledger.append_commit(&spec.sheet_id, &cell, kind, commit_payload)?;
            commit_ids.push(outcome.commit_id);
            changed.extend(outcome.changed_cells);
        }

        let snapshot_appended =
            hierarchy.snapshot_if_relevant(&spec.branch_id, &spec.sheet_id, &changed, ledger)?;

        let receipt = RouteReceipt {
            route_id: route_id.to_string(),
            sheet_id: spec.sheet_id.clone(),
            branch_id: spec.branch_id.clone(),
            idempotency_key: key.clone(),
            commit_ids,
            snapshot_appended,
            duplicate: false,
        };
        receipts.insert(key, receipt.clone());

        info!(
            route = route_id,
            sheet = %spec.sheet_id,
            branch = %spec.branch_id,
            commits = receipt.commit_ids.len(),
            snapshot = snapshot_appended,
            "ingested event"
        );
        Ok(receipt)
    }
}
