//! Builder pattern API for running a trimtrace analysis.
//!
//! Wires the engine together in the order the host pipeline expects:
//!
//! 1. build the dependency graph from facts
//! 2. drop virtual-dispatch edges
//! 3. drop calls whose reflection use was resolved upstream
//! 4. add constructor dependency edges
//! 5. compact, prune nodes that reach nothing interesting, compact again
//! 6. search every interesting method for entry points and report chains
//!
//! ```rust,ignore
//! use trimtrace_core::prelude::*;
//!
//! let (program, facts) = FactRecorder::load(Path::new("facts.json"))?.into_parts();
//! let classifier = RuleClassifier::builtin()?.with_facts(&facts);
//!
//! let report = TrimAnalysis::new(&program, &facts, &classifier)
//!     .grouping(Grouping::Callee)
//!     .json(true)
//!     .run(std::io::stdout())?;
//!
//! println!("{} chains", report.summary.chains);
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::io::Write;
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::classify::{CachedClassifier, Classifier};
use crate::error::TrimtraceResult;
use crate::facts::Facts;
use crate::graph::{CompactGraph, DependencyGraph, IndexMapping, ReachabilityFilter};
use crate::model::{Node, Program};
use crate::report::{
    run_report_pipeline, Categorizer, CategoryRule, ChainWriter, Formatter, Grouping,
    ReportMessage, ReportState, ReportSummary,
};
use crate::search::{all_pairs_search, SearchConstraints};

/// A call the search must never cross, by method key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuppressedCall {
    pub caller: String,
    pub callee: String,
}

/// Tunables for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub grouping: Grouping,
    /// Write chains as JSON instead of text
    pub json: bool,
    /// Search sources on the rayon pool
    pub parallel: bool,
    /// Do not look for callers of virtual methods
    pub ignore_virtual_callers: bool,
    /// Also end chains at static constructors no field access explains
    pub stop_at_untracked_static_constructors: bool,
    pub category_rules: Vec<CategoryRule>,
    pub suppressed_calls: Vec<SuppressedCall>,
}

/// Counters collected while reducing the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GraphStats {
    pub initial_nodes: usize,
    pub initial_edges: usize,
    pub virtual_edges_removed: usize,
    pub resolved_calls_removed: usize,
    pub constructor_edges_added: usize,
    pub pruned_nodes: usize,
    pub final_nodes: usize,
    pub final_edges: usize,
}

/// The reduced graph the search runs on.
#[derive(Debug, Clone)]
pub struct PreparedGraph {
    pub graph: DependencyGraph,
    pub compact: CompactGraph,
    pub mapping: IndexMapping,
    pub stats: GraphStats,
}

/// Result of a finished run.
#[derive(Debug)]
pub struct AnalysisReport<W> {
    pub summary: ReportSummary,
    pub stats: GraphStats,
    /// The sink the chains were written to
    pub output: W,
}

/// Builder for configuring and running an analysis.
///
/// Borrows the program, facts and classifier; nothing is computed until
/// [`TrimAnalysis::prepare`] or [`TrimAnalysis::run`].
pub struct TrimAnalysis<'a> {
    program: &'a Program,
    facts: &'a Facts,
    classifier: &'a dyn Classifier,
    options: AnalysisOptions,
}

impl<'a> TrimAnalysis<'a> {
    pub fn new(program: &'a Program, facts: &'a Facts, classifier: &'a dyn Classifier) -> Self {
        Self {
            program,
            facts,
            classifier,
            options: AnalysisOptions::default(),
        }
    }

    /// Replace every option at once (e.g. from a config file).
    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn grouping(mut self, grouping: Grouping) -> Self {
        self.options.grouping = grouping;
        self
    }

    pub fn json(mut self, enabled: bool) -> Self {
        self.options.json = enabled;
        self
    }

    /// Search sources in parallel. Needs the `parallel` feature.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.options.parallel = enabled;
        self
    }

    pub fn ignore_virtual_callers(mut self, enabled: bool) -> Self {
        self.options.ignore_virtual_callers = enabled;
        self
    }

    pub fn stop_at_untracked_static_constructors(mut self, enabled: bool) -> Self {
        self.options.stop_at_untracked_static_constructors = enabled;
        self
    }

    pub fn category_rules(mut self, rules: impl IntoIterator<Item = CategoryRule>) -> Self {
        self.options.category_rules.extend(rules);
        self
    }

    pub fn suppress_calls(mut self, calls: impl IntoIterator<Item = SuppressedCall>) -> Self {
        self.options.suppressed_calls.extend(calls);
        self
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Build and reduce the graph without searching.
    pub fn prepare(&self) -> TrimtraceResult<PreparedGraph> {
        let mut graph = DependencyGraph::build(self.program, self.facts);
        let mut stats = GraphStats {
            initial_nodes: graph.node_count(),
            initial_edges: graph.edge_count(),
            ..GraphStats::default()
        };

        stats.virtual_edges_removed = graph.remove_virtual_calls();
        stats.resolved_calls_removed =
            graph.remove_calls(self.facts.resolved_reflection_calls.iter().copied());
        let classifier = CachedClassifier::new(self.classifier);
        stats.constructor_edges_added = graph.add_constructor_edges(self.program, &classifier)?;

        let (compact, mapping) = CompactGraph::create_from(&graph, self.program, &classifier)?;
        let prune: Vec<Node> = ReachabilityFilter::compute(&compact)
            .prune_set()
            .into_iter()
            .map(|i| mapping.node(i))
            .collect();
        stats.pruned_nodes = prune.len();
        let (compact, mapping) = if prune.is_empty() {
            (compact, mapping)
        } else {
            graph.remove_methods(prune);
            compact.recompact(&mapping, &graph)
        };
        stats.final_nodes = compact.num_nodes;
        stats.final_edges = compact.edge_count();

        info!(
            nodes = stats.final_nodes,
            edges = stats.final_edges,
            pruned = stats.pruned_nodes,
            interesting = compact.interesting_count(),
            entries = compact.entry_count(),
            "Prepared reduced graph"
        );

        Ok(PreparedGraph {
            graph,
            compact,
            mapping,
            stats,
        })
    }

    /// Where chains may end: entry points, plus untracked static
    /// constructors when enabled.
    fn destinations(&self, prepared: &PreparedGraph) -> Vec<bool> {
        let mut is_destination = prepared.compact.is_entry.clone();
        if !self.options.stop_at_untracked_static_constructors {
            return is_destination;
        }
        let tracked: HashSet<_> = self
            .facts
            .field_access_dependencies
            .iter()
            .map(|&(_, cctor)| cctor)
            .collect();
        for (i, node) in prepared.mapping.index_to_node.iter().enumerate() {
            if let Node::Method(m) = *node {
                if self.program.method(m).is_static_constructor() && !tracked.contains(&m) {
                    is_destination[i] = true;
                }
            }
        }
        is_destination
    }

    fn virtual_mask(&self, prepared: &PreparedGraph) -> Vec<bool> {
        prepared
            .mapping
            .index_to_node
            .iter()
            .map(|node| match *node {
                Node::Method(m) => self.program.method(m).flags.is_virtual,
                Node::Type(_) => false,
            })
            .collect()
    }

    /// Suppressed calls as search-direction index pairs `(callee, caller)`.
    fn suppressed_pairs(&self, prepared: &PreparedGraph) -> HashSet<(usize, usize)> {
        let mut pairs = HashSet::new();
        for call in &self.options.suppressed_calls {
            let index = |key: &str| {
                self.program
                    .method_id(key)
                    .and_then(|m| prepared.mapping.index(Node::Method(m)))
            };
            match (index(&call.caller), index(&call.callee)) {
                (Some(caller), Some(callee)) => {
                    pairs.insert((callee, caller));
                }
                _ => debug!(
                    caller = %call.caller,
                    callee = %call.callee,
                    "Suppressed call not in reduced graph"
                ),
            }
        }
        pairs
    }

    /// Prepare the graph, search it, and write every chain to `out`.
    pub fn run<W: Write + Send>(&self, out: W) -> TrimtraceResult<AnalysisReport<W>> {
        let prepared = self.prepare()?;
        self.run_prepared(&prepared, out)
    }

    /// Search an already prepared graph.
    pub fn run_prepared<W: Write + Send>(
        &self,
        prepared: &PreparedGraph,
        out: W,
    ) -> TrimtraceResult<AnalysisReport<W>> {
        let compact = &prepared.compact;
        let is_destination = self.destinations(prepared);
        let is_virtual = self
            .options
            .ignore_virtual_callers
            .then(|| self.virtual_mask(prepared));
        let suppressed = self.suppressed_pairs(prepared);

        let mut constraints = SearchConstraints::new(&compact.is_interesting, &is_destination)
            .ignore_edges_to(&compact.is_annotated_safe);
        if let Some(mask) = &is_virtual {
            constraints = constraints.ignore_edges_from(mask);
        }
        if !suppressed.is_empty() {
            constraints = constraints.ignore_edges(&suppressed);
        }

        let formatter = Formatter::new(
            self.program,
            &prepared.graph,
            compact,
            &prepared.mapping,
        );
        let categorizer = Categorizer::new(self.program, &self.options.category_rules);
        let state = ReportState::new(compact.num_nodes, self.options.grouping);
        let writer = ChainWriter::new(out, self.options.json, self.options.grouping);
        let parallel = self.options.parallel;

        let (state, output) =
            run_report_pipeline(&formatter, &categorizer, state, writer, |tx| {
                search(&compact.callers, &constraints, parallel, tx);
                Ok(())
            })?;

        for i in compact.interesting_indices() {
            if !state.is_reported(i) {
                warn!(
                    method = %self.program.display(prepared.mapping.node(i)),
                    "Interesting method was never reported"
                );
            }
        }

        let summary = state.summarize(
            self.program,
            compact,
            &prepared.mapping,
            &self.classifier.known_reasons(),
        );
        info!(chains = summary.chains, "Analysis finished");

        Ok(AnalysisReport {
            summary,
            stats: prepared.stats,
            output,
        })
    }
}

fn search(
    neighbors: &[Vec<usize>],
    constraints: &SearchConstraints<'_>,
    parallel: bool,
    tx: Sender<ReportMessage>,
) {
    #[cfg(feature = "parallel")]
    {
        if parallel {
            crate::search::par_all_pairs_search(neighbors, constraints, tx, |tx, r| {
                let _ = tx.send(ReportMessage::Result(r));
            });
            return;
        }
    }
    #[cfg(not(feature = "parallel"))]
    {
        if parallel {
            warn!("Built without the parallel feature, searching sequentially");
        }
    }

    all_pairs_search(neighbors, constraints, |r| {
        let _ = tx.send(ReportMessage::Result(r));
    });
}
