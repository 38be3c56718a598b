//! Graph stages: construction, compaction, reachability pruning.
//!
//! - [`dependency`]: kind-tagged edge set built from facts, with reductions
//! - [`compact`]: dense index snapshot with classification flags
//! - [`reachability`]: reverse BFS from interesting nodes

pub mod compact;
pub mod dependency;
pub mod reachability;

pub use compact::{CompactGraph, IndexMapping};
pub use dependency::DependencyGraph;
pub use reachability::ReachabilityFilter;
