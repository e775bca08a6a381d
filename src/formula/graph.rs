//! Dependency graph
//!
//! Per-sheet formula reference graph. Edges run from a formula cell to each cell
//! it references. Cycle detection (Tarjan SCC) flags every cycle member; the
//! taint closure extends that to everything transitively dependent on a cycle.
//! Acyclic subsets are scheduled in Kahn topological order.

use crate::model::CellRef;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Shape summary returned by `build_formula_dag`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSummary {
    /// Formula cells
    pub nodes: usize,
    /// Reference edges
    pub edges: usize,
    /// Strongly connected components containing a cycle
    pub cycle_count: usize,
}

/// Outcome of a cycle scan
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Cells that are members of some reference cycle
    pub members: BTreeSet<CellRef>,
    /// Number of cyclic strongly connected components
    pub count: usize,
}

/// Formula reference graph for one sheet.
///
/// Deterministic containers throughout: iteration order feeds the evaluator and
/// ultimately the replay hash, so nothing here may depend on hash randomization.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Formula cell -> cells it references
    precedents: BTreeMap<CellRef, BTreeSet<CellRef>>,
    /// Cell -> formula cells that reference it
    dependents: BTreeMap<CellRef, BTreeSet<CellRef>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing reference edges of a formula cell.
    pub fn set_edges(&mut self, cell: &CellRef, refs: BTreeSet<CellRef>) {
        self.clear_edges(cell);
        for r in &refs {
            self.dependents
                .entry(r.clone())
                .or_default()
                .insert(cell.clone());
        }
        self.precedents.insert(cell.clone(), refs);
    }

    /// Remove all outgoing reference edges of a cell (CellClear / CellSet).
    pub fn clear_edges(&mut self, cell: &CellRef) {
        if let Some(old) = self.precedents.remove(cell) {
            for r in &old {
                if let Some(deps) = self.dependents.get_mut(r) {
                    deps.remove(cell);
                    if deps.is_empty() {
                        self.dependents.remove(r);
                    }
                }
            }
        }
    }

    pub fn is_formula(&self, cell: &CellRef) -> bool {
        self.precedents.contains_key(cell)
    }

    pub fn precedents_of(&self, cell: &CellRef) -> Option<&BTreeSet<CellRef>> {
        self.precedents.get(cell)
    }

    /// Transitive closure of "referenced by", excluding the seed cells themselves
    /// unless they are reachable through a cycle.
    pub fn dependents_closure(&self, seeds: &BTreeSet<CellRef>) -> BTreeSet<CellRef> {
        let mut out = BTreeSet::new();
        let mut frontier: Vec<CellRef> = seeds.iter().cloned().collect();
        while let Some(cell) = frontier.pop() {
            if let Some(deps) = self.dependents.get(&cell) {
                for d in deps {
                    if out.insert(d.clone()) {
                        frontier.push(d.clone());
                    }
                }
            }
        }
        out
    }

    /// Detect reference cycles via an iterative Tarjan SCC pass over formula cells.
    pub fn cycle_report(&self) -> CycleReport {
        let nodes: Vec<&CellRef> = self.precedents.keys().collect();
        let index_of: BTreeMap<&CellRef, usize> =
            nodes.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        // Adjacency restricted to formula cells; literal precedents cannot
        // extend a cycle.
        let adj: Vec<Vec<usize>> = nodes
            .iter()
            .map(|c| {
                self.precedents[*c]
                    .iter()
                    .filter_map(|p| index_of.get(p).copied())
                    .collect()
            })
            .collect();

        let n = nodes.len();
        let mut index: Vec<Option<usize>> = vec![None; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut report = CycleReport::default();

        struct Frame {
            v: usize,
            edge: usize,
        }

        for root in 0..n {
            if index[root].is_some() {
                continue;
            }
            let mut frames = vec![Frame { v: root, edge: 0 }];
            while let Some(frame) = frames.last_mut() {
                let v = frame.v;
                if frame.edge == 0 {
                    index[v] = Some(next_index);
                    low[v] = next_index;
                    next_index += 1;
                    stack.push(v);
                    on_stack[v] = true;
                }
                if frame.edge < adj[v].len() {
                    let w = adj[v][frame.edge];
                    frame.edge += 1;
                    if index[w].is_none() {
                        frames.push(Frame { v: w, edge: 0 });
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w].unwrap_or(low[v]));
                    }
                } else {
                    frames.pop();
                    if let Some(parent) = frames.last() {
                        low[parent.v] = low[parent.v].min(low[v]);
                    }
                    if Some(low[v]) == index[v] {
                        let mut scc = Vec::new();
                        while let Some(w) = stack.pop() {
                            on_stack[w] = false;
                            scc.push(w);
                            if w == v {
                                break;
                            }
                        }
                        let cyclic = scc.len() > 1 || adj[v].contains(&v);
                        if cyclic {
                            report.count += 1;
                            for w in scc {
                                report.members.insert(nodes[w].clone());
                            }
                        }
                    }
                }
            }
        }

        report
    }

    /// Cycle members plus everything transitively dependent on one. These cells
    /// are `Indeterminate`: their value is withheld, never stale.
    pub fn tainted(&self) -> BTreeSet<CellRef> {
        let report = self.cycle_report();
        let mut tainted = report.members.clone();
        tainted.extend(self.dependents_closure(&report.members));
        tainted
    }

    /// Kahn topological order over `subset` (formula cells only). Callers must
    /// exclude tainted cells first; precedents outside the subset are treated as
    /// already materialized.
    pub fn topo_order(&self, subset: &BTreeSet<CellRef>) -> Vec<CellRef> {
        let mut in_degree: BTreeMap<&CellRef, usize> = BTreeMap::new();
        for cell in subset {
            let deg = self
                .precedents
                .get(cell)
                .map(|ps| ps.iter().filter(|p| subset.contains(*p)).count())
                .unwrap_or(0);
            in_degree.insert(cell, deg);
        }

        let mut ready: BTreeSet<&CellRef> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(c, _)| *c)
            .collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(cell) = ready.iter().next().cloned() {
            ready.remove(cell);
            order.push(cell.clone());
            if let Some(deps) = self.dependents.get(cell) {
                for d in deps {
                    if let Some(deg) = in_degree.get_mut(d) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.insert(d);
                        }
                    }
                }
            }
        }

        order
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            nodes: self.precedents.len(),
            edges: self.precedents.values().map(|p| p.len()).sum(),
            cycle_count: self.cycle_report().count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cell(s: &str) -> CellRef {
        CellRef::parse(s).unwrap()
    }

    fn refs(items: &[&str]) -> BTreeSet<CellRef> {
        items.iter().map(|s| cell(s)).collect()
    }

    #[test]
    fn two_cell_cycle_is_detected() {
        let mut g = DependencyGraph::new();
        g.set_edges(&cell("E1"), refs(&["F1"]));
        g.set_edges(&cell("F1"), refs(&["E1"]));

        let report = g.cycle_report();
        assert_eq!(report.count, 1);
        assert_eq!(report.members, refs(&["E1", "F1"]));
    }

    #[test]
    fn taint_extends_to_transitive_dependents() {
        let mut g = DependencyGraph::new();
        g.set_edges(&cell("E1"), refs(&["F1"]));
        g.set_edges(&cell("F1"), refs(&["E1"]));
        g.set_edges(&cell("G1"), refs(&["F1"]));
        g.set_edges(&cell("H1"), refs(&["G1"]));

        assert_eq!(g.tainted(), refs(&["E1", "F1", "G1", "H1"]));
    }

    #[test]
    fn removing_cycle_edge_clears_taint() {
        let mut g = DependencyGraph::new();
        g.set_edges(&cell("E1"), refs(&["F1"]));
        g.set_edges(&cell("F1"), refs(&["E1"]));
        assert_eq!(g.cycle_report().count, 1);

        g.clear_edges(&cell("F1"));
        assert_eq!(g.cycle_report().count, 0);
        assert!(g.tainted().is_empty());
    }

    #[test]
    fn self_loop_counts_as_cycle() {
        let mut g = DependencyGraph::new();
        g.set_edges(&cell("A1"), refs(&["A1"]));
        let report = g.cycle_report();
        assert_eq!(report.count, 1);
        assert_eq!(report.members, refs(&["A1"]));
    }

    #[test]
    fn topo_order_respects_precedents() {
        let mut g = DependencyGraph::new();
        // C1 = B1 + 1, B1 = A1 + 1 (A1 literal, not a node)
        g.set_edges(&cell("C1"), refs(&["B1"]));
        g.set_edges(&cell("B1"), refs(&["A1"]));

        let order = g.topo_order(&refs(&["B1", "C1"]));
        assert_eq!(order, vec![cell("B1"), cell("C1")]);
    }

    #[test]
    fn summary_counts_nodes_edges_cycles() {
        let mut g = DependencyGraph::new();
        g.set_edges(&cell("E1"), refs(&["F1"]));
        g.set_edges(&cell("F1"), refs(&["E1"]));
        g.set_edges(&cell("G1"), refs(&["E1", "F1"]));

        let summary = g.summary();
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.edges, 4);
        assert_eq!(summary.cycle_count, 1);
    }
}
