//! trimtrace-core: explains why dangerous APIs are reachable.
//!
//! Given the call-dependency facts of a compiled program, this library finds,
//! for every "interesting" method (reflection, dynamic code loading, anything
//! a trimming analyzer cannot verify), the shortest call chains from the
//! program's entry surface down to it. Chains are minimal: a chain never runs
//! through a second interesting method or an annotated-safe one.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use trimtrace_core::prelude::*;
//!
//! let (program, facts) = FactRecorder::load(Path::new("facts.json"))?.into_parts();
//! let classifier = RuleClassifier::builtin()?.with_facts(&facts);
//!
//! let report = TrimAnalysis::new(&program, &facts, &classifier)
//!     .grouping(Grouping::Callee)
//!     .run(std::io::stdout())?;
//!
//! print_plain(&mut std::io::stderr(), &report.summary)?;
//! ```
//!
//! # Module Organization
//!
//! - [`model`]: interned method/type metadata and graph node handles
//! - [`facts`]: raw dependency facts, the recorder and the JSON fact file
//! - [`classify`]: the classifier trait and the TOML rule classifier
//! - [`graph`]: dependency graph, compaction and reachability pruning
//! - [`search`]: constrained BFS from interesting methods to entry points
//! - [`report`]: chain formatting, grouping, categories, summaries
//! - [`analysis`]: fluent builder that runs the whole pipeline
//! - [`config`]: trimtrace.toml loading
//! - [`error`]: typed error handling
//!
//! # Cargo Features
//!
//! - `dot` (default): Graphviz DOT export of the reduced graph
//! - `parallel` (default): search sources on the rayon pool
//! - `full`: Enable all optional features

pub mod analysis;
pub mod classify;
pub mod common;
pub mod config;
pub mod error;
pub mod facts;
pub mod graph;
pub mod logging;
pub mod model;
pub mod prelude;
pub mod report;
pub mod search;

pub use common::GraphTraversal;

#[cfg(feature = "dot")]
pub mod visualize;

// ============================================================================
// Explicit Re-exports (avoiding glob imports for clear API surface)
// ============================================================================

// Error types
pub use error::{IoResultExt, TrimtraceError, TrimtraceResult};

// Analysis driver
pub use analysis::{
    AnalysisOptions, AnalysisReport, GraphStats, PreparedGraph, SuppressedCall, TrimAnalysis,
};

// Data model
pub use model::{
    Edge, EdgeKind, MethodDef, MethodFlags, MethodId, Node, NodeKind, Parameter, Program,
    TypeDef, TypeId,
};

// Facts
pub use facts::{FactRecorder, Facts, RawFacts, RawMethod, RawType};

// Classification
pub use classify::{
    CachedClassifier, Classifier, Reason, RuleClassifier, RuleFamily, RuleSpec, RuleTable,
    SetClassifier,
};

// Graph stages
pub use graph::{CompactGraph, DependencyGraph, IndexMapping, ReachabilityFilter};

// Search
pub use search::{all_pairs_search, bfs, PathResult, SearchConstraints, UNREACHED};
#[cfg(feature = "parallel")]
pub use search::par_all_pairs_search;

// Configuration
pub use config::{
    load_config, load_config_file, OutputConfig, OutputFormat, RulesConfig, SearchConfig,
    TrimtraceConfig, CONFIG_FILE_NAME,
};

// Logging
pub use logging::{init_structured_logging, log_error, log_info, log_warn};

// Reporting
pub use report::{
    print_json, print_plain, run_report_pipeline, Categorizer, CategoryRule, ChainWriter, Count,
    FormattedChain, Formatter, Grouping, NamespaceHits, ReportMessage, ReportState,
    ReportSummary, RESOLUTION_FAILURE,
};

#[cfg(feature = "dot")]
pub use visualize::generate_dot;

#[cfg(test)]
mod tests;
