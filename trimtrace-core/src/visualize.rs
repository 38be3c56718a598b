//! Graphviz DOT export of a reduced dependency graph.
//!
//! Goes through a petgraph `DiGraphMap` so parallel edges of different
//! kinds collapse to one arrow, like the compact graph does.

use petgraph::graphmap::DiGraphMap;
use std::fmt::Write;
use tracing::error;

use crate::analysis::PreparedGraph;
use crate::model::{EdgeKind, Node, Program};

/// Generate a Graphviz DOT representation of a prepared graph.
///
/// - interesting methods are lightcoral
/// - entry methods are lightgreen
/// - annotated-safe methods are lightblue
/// - types are drawn as ellipses
/// - non-call edges are dashed and labelled with their kind
pub fn generate_dot(prepared: &PreparedGraph, program: &Program) -> String {
    let graph = prepared.graph.to_graph_map();
    let estimated_capacity = graph.node_count() * 96 + graph.edge_count() * 48 + 150;
    let mut dot = String::with_capacity(estimated_capacity);

    if let Err(e) = write_dot_content(&mut dot, &graph, prepared, program) {
        error!(error = %e, "Failed to generate DOT string");
        return "digraph trimtrace {\n}\n".to_string();
    }
    dot
}

fn node_id(node: Node) -> String {
    match node {
        Node::Method(m) => format!("m{}", m.index()),
        Node::Type(t) => format!("t{}", t.index()),
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn fill_color(prepared: &PreparedGraph, node: Node) -> &'static str {
    let Some(i) = prepared.mapping.index(node) else {
        return "white";
    };
    let compact = &prepared.compact;
    if compact.is_interesting[i] {
        "lightcoral"
    } else if compact.is_entry[i] {
        "lightgreen"
    } else if compact.is_annotated_safe[i] {
        "lightblue"
    } else {
        "white"
    }
}

fn write_dot_content(
    dot: &mut String,
    graph: &DiGraphMap<Node, EdgeKind>,
    prepared: &PreparedGraph,
    program: &Program,
) -> std::fmt::Result {
    writeln!(dot, "digraph trimtrace {{")?;
    writeln!(dot, "  rankdir=LR;")?;
    writeln!(
        dot,
        "  node [shape=box, style=filled, fontname=\"JetBrains Mono\"];"
    )?;
    writeln!(dot)?;

    for node in graph.nodes() {
        let shape = match node {
            Node::Method(_) => "",
            Node::Type(_) => ", shape=ellipse",
        };
        writeln!(
            dot,
            "  {} [label=\"{}\", fillcolor={}{}];",
            node_id(node),
            escape(&program.display(node)),
            fill_color(prepared, node),
            shape
        )?;
    }

    writeln!(dot)?;

    for (from, to, kind) in graph.all_edges() {
        if kind.is_call() {
            writeln!(dot, "  {} -> {};", node_id(from), node_id(to))?;
        } else {
            writeln!(
                dot,
                "  {} -> {} [style=dashed, label=\"{}\"];",
                node_id(from),
                node_id(to),
                kind
            )?;
        }
    }

    writeln!(dot, "}}")?;
    Ok(())
}
