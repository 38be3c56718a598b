//! Rendering of search results as call chains.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::classify::Reason;
use crate::error::TrimtraceResult;
use crate::graph::{CompactGraph, DependencyGraph, IndexMapping};
use crate::model::{EdgeKind, Node, Program};
use crate::search::PathResult;

/// How chains are bucketed in the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    /// Streamed one by one
    #[default]
    None,
    /// By the interesting method at the start of the chain
    Callee,
    /// By the entry point at the end of the chain
    Caller,
}

impl FromStr for Grouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Grouping::None),
            "callee" => Ok(Grouping::Callee),
            "caller" => Ok(Grouping::Caller),
            other => Err(format!(
                "unknown grouping '{other}' (expected none, callee or caller)"
            )),
        }
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grouping::None => write!(f, "none"),
            Grouping::Callee => write!(f, "callee"),
            Grouping::Caller => write!(f, "caller"),
        }
    }
}

/// One chain from an interesting method to an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedChain {
    /// Nodes from the interesting source to the destination
    pub nodes: Vec<Node>,
    /// Header, frames and hop labels, in output order
    pub lines: Vec<String>,
    pub reason: Option<Reason>,
}

impl FormattedChain {
    pub fn source(&self) -> Node {
        self.nodes[0]
    }

    pub fn destination(&self) -> Node {
        self.nodes[self.nodes.len() - 1]
    }

    /// The node this chain is grouped under.
    pub fn group_key(&self, grouping: Grouping) -> Option<Node> {
        match grouping {
            Grouping::None => None,
            Grouping::Callee => Some(self.source()),
            Grouping::Caller => Some(self.destination()),
        }
    }

    /// Plain text, one line per entry, newline terminated.
    pub fn as_text(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// JSON array of the same lines.
    pub fn as_json(&self) -> String {
        serde_json::to_string_pretty(&self.lines).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Turns [`PathResult`]s into [`FormattedChain`]s.
///
/// Borrows everything read-only so it can be shared with the report thread.
pub struct Formatter<'a> {
    program: &'a Program,
    compact: &'a CompactGraph,
    mapping: &'a IndexMapping,
    /// Edge kinds per `(from, to)` pair of the graph
    hops: HashMap<(Node, Node), Vec<EdgeKind>>,
}

impl<'a> Formatter<'a> {
    pub fn new(
        program: &'a Program,
        graph: &'a DependencyGraph,
        compact: &'a CompactGraph,
        mapping: &'a IndexMapping,
    ) -> Self {
        let mut hops: HashMap<(Node, Node), Vec<EdgeKind>> = HashMap::new();
        for e in graph.edges() {
            hops.entry((e.from, e.to)).or_default().push(e.kind);
        }
        Self {
            program,
            compact,
            mapping,
            hops,
        }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    /// Display form of a node: method signature, `-- (type) -- Name` for
    /// types, `(???) key` for unresolved metadata.
    pub fn frame(&self, node: Node) -> String {
        match node {
            Node::Method(_) => self.program.display(node),
            Node::Type(_) => format!("-- (type) -- {}", self.program.display(node)),
        }
    }

    /// Label for the hop between two adjacent chain nodes.
    ///
    /// `dependent` depends on `dependency`. A hop that is also a plain
    /// call gets no label.
    fn hop_label(&self, dependent: Node, dependency: Node) -> Option<&'static str> {
        let kinds = self
            .hops
            .get(&(dependent, dependency))
            .map(Vec::as_slice)
            .unwrap_or_default();
        if kinds.iter().any(|k| k.is_direct_call()) {
            return None;
        }
        kinds.iter().find_map(|k| k.hop_label())
    }

    /// Format the chain from `result.source` to `destination`.
    pub fn format(&self, result: &PathResult, destination: usize) -> TrimtraceResult<FormattedChain> {
        let path = result.path_to(destination)?;
        let nodes: Vec<Node> = path.iter().map(|&i| self.mapping.node(i)).collect();
        let reason = self.compact.reasons[result.source].clone();

        let mut lines = Vec::with_capacity(nodes.len() * 2 + 1);
        lines.push(match &reason {
            Some(r) => format!("---------- ({r})"),
            None => "---------- (???)".to_string(),
        });
        for (k, &node) in nodes.iter().enumerate() {
            if k > 0 {
                if let Some(label) = self.hop_label(node, nodes[k - 1]) {
                    lines.push(format!("-- {label}"));
                }
            }
            lines.push(self.frame(node));
        }

        Ok(FormattedChain {
            nodes,
            lines,
            reason,
        })
    }
}
