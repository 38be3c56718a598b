//! Utilities shared across the graph stages.

mod graph_trait;

pub use graph_trait::GraphTraversal;
