//! Shared graph traversal abstraction.
//!
//! The reachability filter walks the compact graph's caller adjacency
//! through this trait without caring how it is stored.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Trait for graph traversal operations.
///
/// # Example
/// ```ignore
/// impl GraphTraversal for CallerView<'_> {
///     type Node = usize;
///
///     fn visit_neighbors<F: FnMut(usize)>(&self, node: &usize, f: F) {
///         self.0.callers[*node].iter().copied().for_each(f);
///     }
///
///     fn contains_node(&self, node: &usize) -> bool {
///         *node < self.0.num_nodes
///     }
/// }
///
/// let reaching = CallerView(&graph).reachable_from(interesting);
/// ```
pub trait GraphTraversal {
    /// The type used to identify nodes in the graph.
    type Node: Clone + Eq + Hash;

    /// Calls `f` once per outgoing neighbor of `node`.
    fn visit_neighbors<F: FnMut(Self::Node)>(&self, node: &Self::Node, f: F);

    /// Checks if the graph contains a node.
    fn contains_node(&self, node: &Self::Node) -> bool;

    /// Multi-source BFS: every node reachable from any root, roots included.
    ///
    /// O(|V| + |E|) regardless of the number of roots. Roots not in the
    /// graph are ignored. Cycles are safe.
    fn reachable_from<I>(&self, roots: I) -> HashSet<Self::Node>
    where
        I: IntoIterator<Item = Self::Node>,
    {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for root in roots {
            if self.contains_node(&root) && visited.insert(root.clone()) {
                queue.push_back(root);
            }
        }

        while let Some(node) = queue.pop_front() {
            self.visit_neighbors(&node, |neighbor| {
                if visited.insert(neighbor.clone()) {
                    queue.push_back(neighbor);
                }
            });
        }

        visited
    }
}
