//! Route registry and typed event payloads
//!
//! The registry is a static table for a deployment: seeded with the known
//! business event kinds at construction, never mutated afterward. Payloads form
//! a tagged union keyed by route id, each carrying an idempotency key and an
//! event timestamp on top of its domain fields.

use crate::error::{malformed, LedgerError, LedgerResult};
use crate::model::{CellValue, CommitKind, CommitPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target of one route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub route_id: String,
    pub sheet_id: String,
    pub branch_id: String,
}

/// Static route table
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: BTreeMap<String, RouteSpec>,
}

impl RouteRegistry {
    /// The standard business routes: procure-to-pay events land on the P2P
    /// branch, manufacturing events on the MFG branch.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.add("requisitionLine", "p2p-req", "P2P");
        registry.add("invoiceLine", "p2p-inv", "P2P");
        registry.add("workOrder", "mfg-wo", "MFG");
        registry.add("materialIssue", "mfg-mi", "MFG");
        registry
    }

    pub fn add(&mut self, route_id: &str, sheet_id: &str, branch_id: &str) {
        self.routes.insert(
            route_id.to_string(),
            RouteSpec {
                route_id: route_id.to_string(),
                sheet_id: sheet_id.to_string(),
                branch_id: branch_id.to_string(),
            },
        );
    }

    pub fn resolve(&self, route_id: &str) -> LedgerResult<&RouteSpec> {
        self.routes
            .get(route_id)
            .ok_or_else(|| LedgerError::UnknownRoute(route_id.to_string()))
    }

    pub fn specs(&self) -> impl Iterator<Item = &RouteSpec> {
        self.routes.values()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequisitionLine {
    pub idempotency_key: String,
    pub event_ts: DateTime<Utc>,
    pub line_no: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub idempotency_key: String,
    pub event_ts: DateTime<Utc>,
    pub line_no: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub idempotency_key: String,
    pub event_ts: DateTime<Utc>,
    pub order_no: u32,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialIssue {
    pub idempotency_key: String,
    pub event_ts: DateTime<Utc>,
    pub issue_no: u32,
    pub quantity: f64,
}

/// Tagged union of route payloads, keyed by route id
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    RequisitionLine(RequisitionLine),
    InvoiceLine(InvoiceLine),
    WorkOrder(WorkOrder),
    MaterialIssue(MaterialIssue),
}

impl RouteEvent {
    /// Deserialize a raw payload against the schema its route id selects.
    pub fn parse(route_id: &str, payload: serde_json::Value) -> LedgerResult<Self> {
        let parsed = match route_id {
            "requisitionLine" => serde_json::from_value(payload).map(RouteEvent::RequisitionLine),
            "invoiceLine" => serde_json::from_value(payload).map(RouteEvent::InvoiceLine),
            "workOrder" => serde_json::from_value(payload).map(RouteEvent::WorkOrder),
            "materialIssue" => serde_json::from_value(payload).map(RouteEvent::MaterialIssue),
            other => return Err(LedgerError::UnknownRoute(other.to_string())),
        };
        parsed.map_err(|e| malformed(format!("payload for route '{}' rejected: {}", route_id, e)))
    }

    pub fn idempotency_key(&self) -> &str {
        match self {
            RouteEvent::RequisitionLine(e) => &e.idempotency_key,
            RouteEvent::InvoiceLine(e) => &e.idempotency_key,
            RouteEvent::WorkOrder(e) => &e.idempotency_key,
            RouteEvent::MaterialIssue(e) => &e.idempotency_key,
        }
    }

    pub fn event_ts(&self) -> DateTime<Utc> {
        match self {
            RouteEvent::RequisitionLine(e) => e.event_ts,
            RouteEvent::InvoiceLine(e) => e.event_ts,
            RouteEvent::WorkOrder(e) => e.event_ts,
            RouteEvent::MaterialIssue(e) => e.event_ts,
        }
    }

    /// Cell commits this event maps to on its target sheet.
    pub fn cell_commits(&self) -> Vec<(String, CommitKind, CommitPayload)> {
        let set = |cell: String, n: f64| {
            (
                cell,
                CommitKind::CellSet,
                CommitPayload::Value {
                    value: CellValue::Number(n),
                },
            )
        };
        match self {
            RouteEvent::RequisitionLine(e) => vec![set(format!("REQ{}", e.line_no), e.amount)],
            RouteEvent::InvoiceLine(e) => vec![set(format!("INV{}", e.line_no), e.amount)],
            RouteEvent::WorkOrder(e) => vec![set(format!("WO{}", e.order_no), e.quantity)],
            RouteEvent::MaterialIssue(e) => vec![set(format!("MI{}", e.issue_no), e.quantity)],
        }
    }
}
