//! Formula subsystem
//!
//! Parsing, dependency graph construction with cycle detection, and topological
//! evaluation with tri-state statuses.

pub mod eval;
pub mod graph;
pub mod parser;

pub use eval::{EvalFault, EvalOutcome};
pub use graph::{DependencyGraph, GraphSummary};
pub use parser::{parse_formula, Expr};
