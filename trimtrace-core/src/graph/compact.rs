//! Dense, index-addressed snapshot of a [`DependencyGraph`].
//!
//! Every node gets an index in `0..num_nodes` (graph insertion order), and
//! adjacency lives in jagged `Vec<Vec<usize>>` arrays so the search can run
//! over plain slices. The snapshot is stale as soon as the source graph is
//! mutated; rebuild it with [`CompactGraph::create_from`].

use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::dependency::DependencyGraph;
use crate::classify::{Classifier, Reason};
use crate::error::TrimtraceResult;
use crate::model::{Node, Program};

/// Bidirectional mapping between graph nodes and dense indices.
#[derive(Debug, Clone, Default)]
pub struct IndexMapping {
    pub index_to_node: Vec<Node>,
    pub node_to_index: HashMap<Node, usize>,
}

impl IndexMapping {
    pub fn node(&self, index: usize) -> Node {
        self.index_to_node[index]
    }

    pub fn index(&self, node: Node) -> Option<usize> {
        self.node_to_index.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.index_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_node.is_empty()
    }
}

/// Index-addressed graph with cached classification flags.
#[derive(Debug, Clone, Default)]
pub struct CompactGraph {
    pub num_nodes: usize,
    pub is_interesting: Vec<bool>,
    pub is_entry: Vec<bool>,
    pub is_annotated_safe: Vec<bool>,
    /// Reason for each interesting index
    pub reasons: Vec<Option<Reason>>,
    /// Forward adjacency: `callees[i]` are the nodes `i` depends on
    pub callees: Vec<Vec<usize>>,
    /// Reverse adjacency: `callers[i]` are the nodes depending on `i`
    pub callers: Vec<Vec<usize>>,
}

/// Per-index classification, before it is moved into a [`CompactGraph`].
struct Flags {
    is_interesting: Vec<bool>,
    is_entry: Vec<bool>,
    is_annotated_safe: Vec<bool>,
    reasons: Vec<Option<Reason>>,
}

impl Flags {
    fn cleared(num_nodes: usize) -> Self {
        Self {
            is_interesting: vec![false; num_nodes],
            is_entry: vec![false; num_nodes],
            is_annotated_safe: vec![false; num_nodes],
            reasons: vec![None; num_nodes],
        }
    }
}

/// Dense indices and adjacency of a graph, without classification.
struct Indexed {
    mapping: IndexMapping,
    callees: Vec<Vec<usize>>,
    callers: Vec<Vec<usize>>,
    pairs: usize,
}

impl Indexed {
    fn build(graph: &DependencyGraph) -> Self {
        let index_to_node: Vec<Node> = graph.nodes().collect();
        let node_to_index: HashMap<Node, usize> = index_to_node
            .iter()
            .enumerate()
            .map(|(i, &n)| (n, i))
            .collect();
        let num_nodes = index_to_node.len();

        let mut seen: HashSet<(usize, usize)> = HashSet::with_capacity(graph.edge_count());
        let mut pairs = Vec::with_capacity(graph.edge_count());
        for e in graph.edges() {
            // Both endpoints are nodes by construction.
            let (Some(&from), Some(&to)) = (node_to_index.get(&e.from), node_to_index.get(&e.to))
            else {
                continue;
            };
            if seen.insert((from, to)) {
                pairs.push((from, to));
            }
        }

        let mut out_degree = vec![0usize; num_nodes];
        let mut in_degree = vec![0usize; num_nodes];
        for &(from, to) in &pairs {
            out_degree[from] += 1;
            in_degree[to] += 1;
        }
        let mut callees: Vec<Vec<usize>> =
            out_degree.iter().map(|&d| Vec::with_capacity(d)).collect();
        let mut callers: Vec<Vec<usize>> =
            in_degree.iter().map(|&d| Vec::with_capacity(d)).collect();
        for &(from, to) in &pairs {
            callees[from].push(to);
            callers[to].push(from);
        }

        Self {
            mapping: IndexMapping {
                index_to_node,
                node_to_index,
            },
            callees,
            callers,
            pairs: pairs.len(),
        }
    }

    fn finish(self, flags: Flags) -> (CompactGraph, IndexMapping) {
        let compact = CompactGraph {
            num_nodes: self.mapping.len(),
            is_interesting: flags.is_interesting,
            is_entry: flags.is_entry,
            is_annotated_safe: flags.is_annotated_safe,
            reasons: flags.reasons,
            callees: self.callees,
            callers: self.callers,
        };
        debug!(
            nodes = compact.num_nodes,
            edges = self.pairs,
            interesting = compact.interesting_count(),
            entries = compact.entry_count(),
            "Compacted dependency graph"
        );
        (compact, self.mapping)
    }
}

impl CompactGraph {
    /// Snapshot `graph`, querying the classifier exactly once per method.
    ///
    /// Pairs recorded with several edge kinds collapse to one adjacency
    /// entry. Classifier errors propagate.
    pub fn create_from(
        graph: &DependencyGraph,
        program: &Program,
        classifier: &dyn Classifier,
    ) -> TrimtraceResult<(CompactGraph, IndexMapping)> {
        let indexed = Indexed::build(graph);
        let mut flags = Flags::cleared(indexed.mapping.len());
        for (i, node) in indexed.mapping.index_to_node.iter().enumerate() {
            let Node::Method(m) = *node else {
                continue;
            };
            flags.is_entry[i] = classifier.is_entry(program, m);
            flags.is_annotated_safe[i] = classifier.is_annotated_safe(program, m);
            if let Some(reason) = classifier.interesting_reason(program, m)? {
                flags.is_interesting[i] = true;
                flags.reasons[i] = Some(reason);
            }
        }
        Ok(indexed.finish(flags))
    }

    /// Snapshot `graph` again after nodes were removed from it, carrying
    /// each surviving node's flags over from `self` instead of
    /// reclassifying. Nodes `mapping` does not know get cleared flags.
    pub fn recompact(
        &self,
        mapping: &IndexMapping,
        graph: &DependencyGraph,
    ) -> (CompactGraph, IndexMapping) {
        let indexed = Indexed::build(graph);
        let mut flags = Flags::cleared(indexed.mapping.len());
        for (i, &node) in indexed.mapping.index_to_node.iter().enumerate() {
            let Some(old) = mapping.index(node) else {
                continue;
            };
            flags.is_interesting[i] = self.is_interesting[old];
            flags.is_entry[i] = self.is_entry[old];
            flags.is_annotated_safe[i] = self.is_annotated_safe[old];
            flags.reasons[i] = self.reasons[old].clone();
        }
        indexed.finish(flags)
    }

    /// Build from forward adjacency alone, with every flag cleared.
    #[cfg(test)]
    pub(crate) fn from_callees(callees: Vec<Vec<usize>>) -> Self {
        let num_nodes = callees.len();
        let mut callers = vec![Vec::new(); num_nodes];
        for (from, targets) in callees.iter().enumerate() {
            for &to in targets {
                callers[to].push(from);
            }
        }
        let flags = Flags::cleared(num_nodes);
        Self {
            num_nodes,
            is_interesting: flags.is_interesting,
            is_entry: flags.is_entry,
            is_annotated_safe: flags.is_annotated_safe,
            reasons: flags.reasons,
            callees,
            callers,
        }
    }

    pub fn interesting_count(&self) -> usize {
        self.is_interesting.iter().filter(|&&b| b).count()
    }

    pub fn entry_count(&self) -> usize {
        self.is_entry.iter().filter(|&&b| b).count()
    }

    /// Indices of interesting nodes, ascending.
    pub fn interesting_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.is_interesting
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
    }

    pub fn edge_count(&self) -> usize {
        self.callees.iter().map(Vec::len).sum()
    }
}
