//! Branch/trunk aggregation
//!
//! Branches keep append-only KPI histories scoped to their own sheets; the trunk
//! derives deterministic aggregates with full contributor provenance.

pub mod branch;
pub mod trunk;

pub use branch::{Branch, HierarchyStore, KpiBinding, KpiSnapshot, MetricSample};
pub use trunk::{get_trunk_metrics, Contributor, TrunkMetric, TrunkMetrics};
