//! Event router
//!
//! Maps external business events to target sheets/branches via a static route
//! registry, applies the corresponding cell commits, and triggers recompute and
//! KPI snapshots scoped to the owning branch only. Unknown routes refuse;
//! payloads are idempotent by key.

pub mod ingest;
pub mod registry;

pub use ingest::{EventRouter, RouteReceipt};
pub use registry::{RouteEvent, RouteRegistry, RouteSpec};
