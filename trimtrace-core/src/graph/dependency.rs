//! Dependency graph over methods and types.
//!
//! Built once from recorded facts. Virtual dispatch is resolved here, at
//! construction time, against the override relation; afterwards the graph
//! only knows kind-tagged edges. Node membership is derived from the edges:
//! a node exists iff some edge touches it.
//!
//! # Performance Characteristics
//!
//! - Build: O(|facts| + Σ|override closure|)
//! - `remove_*`: O(|E|) each, node set rebuilt from the surviving edges

use indexmap::IndexSet;
use petgraph::graphmap::DiGraphMap;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::error::{TrimtraceError, TrimtraceResult};
use crate::facts::Facts;
use crate::model::{Edge, EdgeKind, MethodId, Node, Program};

/// Deduplicated, insertion-ordered edge set plus the node set it induces.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: IndexSet<Edge>,
    nodes: IndexSet<Node>,
    /// Methods that were callees of resolved virtual dispatch
    virtual_targets: IndexSet<MethodId>,
    constructor_edges_added: bool,
}

impl DependencyGraph {
    /// Build the graph from recorded facts.
    pub fn build(program: &Program, facts: &Facts) -> Self {
        let mut graph = Self::default();

        for &(caller, callee) in &facts.direct_calls {
            graph.insert(Edge::new(caller, callee, EdgeKind::DirectCall));
        }

        let overrides = override_index(facts);
        let mut dropped_interface_calls = 0usize;
        for &(caller, callee) in &facts.virtual_calls {
            if !program.method(callee).flags.is_virtual {
                graph.insert(Edge::new(caller, callee, EdgeKind::VirtualCallToNonVirtual));
                continue;
            }
            if program.is_interface_method(callee) {
                dropped_interface_calls += 1;
                continue;
            }
            for target in override_closure(program, facts, &overrides, callee) {
                graph.insert(Edge::new(caller, target, EdgeKind::VirtualCallToVirtual));
                graph.virtual_targets.insert(target);
            }
        }
        if dropped_interface_calls > 0 {
            debug!(dropped_interface_calls, "Dropped calls to interface methods");
        }

        for &(ty, cctor) in &facts.static_constructor_dependencies {
            graph.insert(Edge::new(ty, cctor, EdgeKind::StaticConstructorDependency));
        }
        for &(accessor, cctor) in &facts.field_access_dependencies {
            graph.insert(Edge::new(accessor, cctor, EdgeKind::StaticFieldAccessDependency));
        }
        for &(method, ty) in &facts.type_dependencies {
            graph.insert(Edge::new(method, ty, EdgeKind::TypeDependency));
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );
        graph
    }

    fn insert(&mut self, edge: Edge) {
        if self.edges.insert(edge) {
            self.nodes.insert(edge.from);
            self.nodes.insert(edge.to);
        }
    }

    fn retain_edges(&mut self, keep: impl FnMut(&Edge) -> bool) -> usize {
        let before = self.edges.len();
        self.edges.retain(keep);
        let removed = before - self.edges.len();
        if removed > 0 {
            self.nodes = self.edges.iter().flat_map(|e| [e.from, e.to]).collect();
        }
        removed
    }

    /// Strip every `VirtualCallToVirtual` edge.
    pub fn remove_virtual_calls(&mut self) -> usize {
        let removed = self.retain_edges(|e| e.kind != EdgeKind::VirtualCallToVirtual);
        debug!(removed, "Removed virtual call edges");
        removed
    }

    /// Drop call edges (any call kind) for the given `(caller, callee)` pairs.
    pub fn remove_calls<I>(&mut self, calls: I) -> usize
    where
        I: IntoIterator<Item = (MethodId, MethodId)>,
    {
        let pairs: HashSet<(Node, Node)> = calls
            .into_iter()
            .map(|(a, b)| (Node::Method(a), Node::Method(b)))
            .collect();
        if pairs.is_empty() {
            return 0;
        }
        let removed = self.retain_edges(|e| !(e.kind.is_call() && pairs.contains(&(e.from, e.to))));
        debug!(removed, "Removed resolved call edges");
        removed
    }

    /// Delete the given nodes and every edge touching them.
    pub fn remove_methods<I>(&mut self, nodes: I) -> usize
    where
        I: IntoIterator<Item = Node>,
    {
        let doomed: HashSet<Node> = nodes.into_iter().collect();
        if doomed.is_empty() {
            return 0;
        }
        let removed = self.retain_edges(|e| !doomed.contains(&e.from) && !doomed.contains(&e.to));
        debug!(nodes = doomed.len(), edges = removed, "Removed nodes");
        removed
    }

    /// Add `ConstructorDependency` edges for interesting instance methods
    /// that are only reachable through virtual dispatch.
    ///
    /// Each such method gets an edge from every in-graph instance
    /// constructor of its declaring type. May be applied once.
    pub fn add_constructor_edges(
        &mut self,
        program: &Program,
        classifier: &dyn Classifier,
    ) -> TrimtraceResult<usize> {
        if self.constructor_edges_added {
            return Err(TrimtraceError::invariant(
                "constructor dependency edges were already added",
            ));
        }
        self.constructor_edges_added = true;

        let directly_called: HashSet<Node> = self
            .edges
            .iter()
            .filter(|e| e.kind.is_direct_call())
            .map(|e| e.to)
            .collect();
        let constructors = program.constructor_index();

        let mut new_edges = Vec::new();
        for &method in &self.virtual_targets {
            let def = program.method(method);
            if def.flags.is_static || def.flags.is_constructor {
                continue;
            }
            if directly_called.contains(&Node::Method(method)) {
                continue;
            }
            if classifier.interesting_reason(program, method)?.is_none() {
                continue;
            }

            let ctors: Vec<MethodId> = constructors
                .get(def.declaring_type.as_str())
                .into_iter()
                .flatten()
                .copied()
                .filter(|&c| self.nodes.contains(&Node::Method(c)))
                .collect();

            if ctors.is_empty() {
                if program.declaring_type(method).is_some_and(|t| t.is_interface) {
                    debug!(method = %def.key, "No constructor for interface method");
                } else {
                    warn!(method = %def.key, "No constructor in graph for virtually called method");
                }
                continue;
            }
            for ctor in ctors {
                new_edges.push(Edge::new(ctor, method, EdgeKind::ConstructorDependency));
            }
        }

        let before = self.edges.len();
        for edge in new_edges {
            self.insert(edge);
        }
        let added = self.edges.len() - before;
        debug!(added, "Added constructor dependency edges");
        Ok(added)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes.iter().copied()
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter()
    }

    pub fn contains_node(&self, node: Node) -> bool {
        self.nodes.contains(&node)
    }

    pub fn contains_edge(&self, from: impl Into<Node>, to: impl Into<Node>, kind: EdgeKind) -> bool {
        self.edges.contains(&Edge::new(from, to, kind))
    }

    /// Every kind recorded between `from` and `to`.
    pub fn edge_kinds(&self, from: Node, to: Node) -> Vec<EdgeKind> {
        self.edges
            .iter()
            .filter(|e| e.from == from && e.to == to)
            .map(|e| e.kind)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Collapse into a petgraph map (one edge per pair, first kind wins).
    pub fn to_graph_map(&self) -> DiGraphMap<Node, EdgeKind> {
        let mut g = DiGraphMap::with_capacity(self.nodes.len(), self.edges.len());
        for &node in &self.nodes {
            g.add_node(node);
        }
        for e in &self.edges {
            if !g.contains_edge(e.from, e.to) {
                g.add_edge(e.from, e.to, e.kind);
            }
        }
        g
    }
}

fn override_index(facts: &Facts) -> HashMap<MethodId, Vec<MethodId>> {
    let mut index: HashMap<MethodId, Vec<MethodId>> = HashMap::new();
    for &(base, overriding) in &facts.overrides {
        index.entry(base).or_default().push(overriding);
    }
    index
}

/// Concrete callees of a virtual call to `target`.
///
/// The transitive override closure, without interface members. `target`
/// itself is included only when nothing overrides it or it is recorded as
/// its own override.
fn override_closure(
    program: &Program,
    facts: &Facts,
    overrides: &HashMap<MethodId, Vec<MethodId>>,
    target: MethodId,
) -> Vec<MethodId> {
    let Some(direct) = overrides.get(&target) else {
        return vec![target];
    };

    let mut seen: IndexSet<MethodId> = IndexSet::new();
    if facts.overrides.contains(&(target, target)) {
        seen.insert(target);
    }
    let mut queue: VecDeque<MethodId> = direct.iter().copied().collect();
    while let Some(m) = queue.pop_front() {
        if m == target || !seen.insert(m) {
            continue;
        }
        if let Some(next) = overrides.get(&m) {
            queue.extend(next.iter().copied());
        }
    }

    seen.into_iter()
        .filter(|&m| !program.is_interface_method(m))
        .collect()
}
