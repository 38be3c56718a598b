//! Which nodes can transitively reach an interesting node.
//!
//! A node that reaches nothing interesting can never sit on a reported
//! chain, so the analysis prunes it before searching.

use super::compact::CompactGraph;
use crate::common::GraphTraversal;

/// Reverse view of a compact graph: neighbors are callers.
struct CallerView<'a>(&'a CompactGraph);

impl GraphTraversal for CallerView<'_> {
    type Node = usize;

    fn visit_neighbors<F: FnMut(usize)>(&self, node: &usize, f: F) {
        self.0.callers[*node].iter().copied().for_each(f);
    }

    fn contains_node(&self, node: &usize) -> bool {
        *node < self.0.num_nodes
    }
}

/// Per-index answer to "does this node reach an interesting node".
///
/// Computed once for a given compact graph; recompute after the graph
/// changes.
#[derive(Debug, Clone)]
pub struct ReachabilityFilter {
    reaches: Vec<bool>,
}

impl ReachabilityFilter {
    /// Reverse multi-source BFS from every interesting node. Linear and
    /// cycle-safe.
    pub fn compute(graph: &CompactGraph) -> Self {
        let reached = CallerView(graph).reachable_from(graph.interesting_indices());
        let mut reaches = vec![false; graph.num_nodes];
        for i in reached {
            reaches[i] = true;
        }
        Self { reaches }
    }

    /// True if `index` is interesting or can reach an interesting node.
    pub fn reaches_interesting(&self, index: usize) -> bool {
        self.reaches.get(index).copied().unwrap_or(false)
    }

    /// Every index that reaches no interesting node, ascending.
    pub fn prune_set(&self) -> Vec<usize> {
        self.reaches
            .iter()
            .enumerate()
            .filter_map(|(i, &r)| (!r).then_some(i))
            .collect()
    }
}
