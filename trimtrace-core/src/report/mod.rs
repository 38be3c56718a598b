//! Reporting: chain formatting, bucketing, summaries.
//!
//! - [`format`]: `PathResult` → [`FormattedChain`] text/JSON rendering
//! - [`pipeline`]: producer/consumer plumbing between search and output
//!
//! All bookkeeping lives in an explicit [`ReportState`] owned by the
//! consumer thread and handed back when the run ends.

pub mod format;
pub mod pipeline;

pub use format::{FormattedChain, Formatter, Grouping};
pub use pipeline::{run_report_pipeline, ChainWriter, ReportMessage};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use crate::classify::Reason;
use crate::graph::{CompactGraph, IndexMapping};
use crate::model::{Node, Program};

/// Category given to chains whose destination has no usable metadata.
pub const RESOLUTION_FAILURE: &str = "resolution failure";

/// Named category matched when every substring occurs in some frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub frames_containing: Vec<String>,
}

impl CategoryRule {
    fn matches(&self, chain: &FormattedChain) -> bool {
        !self.frames_containing.is_empty()
            && self
                .frames_containing
                .iter()
                .all(|needle| chain.lines.iter().any(|line| line.contains(needle.as_str())))
    }
}

/// Assigns each chain a category.
///
/// Category rules win, in order. Otherwise the namespace of the
/// destination's declaring type, then of its outermost enclosing type,
/// then the declaring type's full name.
pub struct Categorizer<'a> {
    program: &'a Program,
    rules: &'a [CategoryRule],
}

impl<'a> Categorizer<'a> {
    pub fn new(program: &'a Program, rules: &'a [CategoryRule]) -> Self {
        Self { program, rules }
    }

    pub fn categorize(&self, chain: &FormattedChain) -> String {
        if let Some(rule) = self.rules.iter().find(|r| r.matches(chain)) {
            return rule.name.clone();
        }
        let Node::Method(m) = chain.destination() else {
            return RESOLUTION_FAILURE.to_string();
        };
        let def = self.program.method(m);
        if !def.resolved || def.declaring_type.is_empty() {
            return RESOLUTION_FAILURE.to_string();
        }
        if let Some(ns) = self
            .program
            .type_named(&def.declaring_type)
            .map(|t| t.namespace.as_str())
            .filter(|ns| !ns.is_empty())
        {
            return ns.to_string();
        }
        if let Some(ns) = self.program.outermost_namespace(&def.declaring_type) {
            return ns.to_string();
        }
        def.declaring_type.clone()
    }
}

/// Running tallies kept by the report consumer.
#[derive(Debug, Clone)]
pub struct ReportState {
    grouping: Grouping,
    chain_count: usize,
    per_category: IndexMap<String, usize>,
    per_reason: IndexMap<Reason, usize>,
    /// Outermost namespace → declaring types of reported destinations
    hit_types_per_namespace: IndexMap<String, HashSet<String>>,
    groups: IndexMap<Node, Vec<FormattedChain>>,
    is_reported: Vec<bool>,
}

impl ReportState {
    pub fn new(num_nodes: usize, grouping: Grouping) -> Self {
        Self {
            grouping,
            chain_count: 0,
            per_category: IndexMap::new(),
            per_reason: IndexMap::new(),
            hit_types_per_namespace: IndexMap::new(),
            groups: IndexMap::new(),
            is_reported: vec![false; num_nodes],
        }
    }

    /// Tally one chain from compact index `source` to `destination`.
    ///
    /// Grouped chains are retained until [`ReportState::take_groups`].
    pub fn record(
        &mut self,
        program: &Program,
        chain: FormattedChain,
        category: String,
        source: usize,
        destination: usize,
    ) {
        self.chain_count += 1;
        self.is_reported[source] = true;
        self.is_reported[destination] = true;
        *self.per_category.entry(category).or_insert(0) += 1;
        if let Some(reason) = &chain.reason {
            *self.per_reason.entry(reason.clone()).or_insert(0) += 1;
        }

        if let Node::Method(m) = chain.destination() {
            let declaring = &program.method(m).declaring_type;
            if let Some(ns) = program.outermost_namespace(declaring) {
                self.hit_types_per_namespace
                    .entry(ns.to_string())
                    .or_default()
                    .insert(declaring.clone());
            }
        }

        if let Some(key) = chain.group_key(self.grouping) {
            self.groups.entry(key).or_default().push(chain);
        }
    }

    pub fn chain_count(&self) -> usize {
        self.chain_count
    }

    pub fn is_reported(&self, index: usize) -> bool {
        self.is_reported.get(index).copied().unwrap_or(false)
    }

    /// Retained groups, largest first. Ties keep first-seen order.
    pub fn take_groups(&mut self) -> Vec<(Node, Vec<FormattedChain>)> {
        let mut groups: Vec<(Node, Vec<FormattedChain>)> =
            std::mem::take(&mut self.groups).into_iter().collect();
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        groups
    }

    /// Build the end-of-run summary.
    pub fn summarize(
        &self,
        program: &Program,
        compact: &CompactGraph,
        mapping: &IndexMapping,
        known_reasons: &[Reason],
    ) -> ReportSummary {
        let mut methods_per_reason: IndexMap<Reason, usize> = IndexMap::new();
        let mut unreported = Vec::new();
        for i in compact.interesting_indices() {
            if let Some(reason) = &compact.reasons[i] {
                *methods_per_reason.entry(reason.clone()).or_insert(0) += 1;
            }
            if !self.is_reported(i) {
                unreported.push(program.display(mapping.node(i)));
            }
        }

        let mut declaring_types: HashSet<&str> = HashSet::new();
        let mut method_count = 0usize;
        for &node in &mapping.index_to_node {
            if let Node::Method(m) = node {
                method_count += 1;
                let declaring = program.method(m).declaring_type.as_str();
                if !declaring.is_empty() {
                    declaring_types.insert(declaring);
                }
            }
        }
        let mut total_types_per_namespace: HashMap<&str, usize> = HashMap::new();
        for ty in declaring_types {
            if let Some(ns) = program.outermost_namespace(ty) {
                *total_types_per_namespace.entry(ns).or_insert(0) += 1;
            }
        }

        let mut namespaces: Vec<NamespaceHits> = self
            .hit_types_per_namespace
            .iter()
            .map(|(ns, hits)| NamespaceHits {
                namespace: ns.clone(),
                hit_types: hits.len(),
                total_types: total_types_per_namespace.get(ns.as_str()).copied().unwrap_or(0),
            })
            .collect();
        namespaces.sort_by(|a, b| b.hit_types.cmp(&a.hit_types));
        let mut zero: Vec<NamespaceHits> = total_types_per_namespace
            .iter()
            .filter(|(ns, _)| !self.hit_types_per_namespace.contains_key(**ns))
            .map(|(ns, &total)| NamespaceHits {
                namespace: ns.to_string(),
                hit_types: 0,
                total_types: total,
            })
            .collect();
        zero.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        namespaces.extend(zero);

        ReportSummary {
            methods: method_count,
            entry_methods: compact.entry_count(),
            interesting_methods: compact.interesting_count(),
            chains: self.chain_count,
            chains_per_category: sorted_counts(
                self.per_category.iter().map(|(k, &v)| (k.clone(), v)),
                &[],
            ),
            chains_per_reason: sorted_counts(
                self.per_reason.iter().map(|(k, &v)| (k.to_string(), v)),
                known_reasons,
            ),
            methods_per_reason: sorted_counts(
                methods_per_reason.iter().map(|(k, &v)| (k.to_string(), v)),
                known_reasons,
            ),
            namespaces,
            unreported_interesting: unreported,
        }
    }
}

/// Descending by count (stable), followed by zero lines for known names
/// that never occurred.
fn sorted_counts(counts: impl Iterator<Item = (String, usize)>, known: &[Reason]) -> Vec<Count> {
    let mut out: Vec<Count> = counts.map(|(name, count)| Count { name, count }).collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    let seen: HashSet<String> = out.iter().map(|c| c.name.clone()).collect();
    for reason in known {
        if !seen.contains(reason.as_str()) {
            out.push(Count {
                name: reason.to_string(),
                count: 0,
            });
        }
    }
    out
}

/// A named counter in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Count {
    pub name: String,
    pub count: usize,
}

/// Destination types hit in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceHits {
    pub namespace: String,
    pub hit_types: usize,
    pub total_types: usize,
}

/// End-of-run statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub methods: usize,
    pub entry_methods: usize,
    pub interesting_methods: usize,
    pub chains: usize,
    pub chains_per_category: Vec<Count>,
    pub chains_per_reason: Vec<Count>,
    pub methods_per_reason: Vec<Count>,
    pub namespaces: Vec<NamespaceHits>,
    /// Interesting methods that ended up on no chain
    pub unreported_interesting: Vec<String>,
}

impl ReportSummary {
    /// Human-readable summary, one counter per line.
    pub fn render_text(&self) -> String {
        let mut lines = vec![
            format!("found {} methods", self.methods),
            format!("found {} entry methods", self.entry_methods),
            format!("found {} \"interesting\" methods", self.interesting_methods),
            "-------------".to_string(),
            format!("found {} chains", self.chains),
        ];
        for c in &self.chains_per_category {
            lines.push(format!("{} chains are {}", c.count, c.name));
        }
        lines.push("----------".to_string());
        lines.push(format!("summary: found {} chains", self.chains));
        for c in &self.chains_per_reason {
            lines.push(format!("{} chains are {}", c.count, c.name));
        }
        lines.push("----------".to_string());
        for ns in &self.namespaces {
            lines.push(format!("{}: {} / {}", ns.namespace, ns.hit_types, ns.total_types));
        }
        lines.push("----------".to_string());
        lines.push(format!(
            "summary: found {} interesting methods",
            self.interesting_methods
        ));
        for c in &self.methods_per_reason {
            lines.push(format!("{} methods are {}", c.count, c.name));
        }
        if !self.unreported_interesting.is_empty() {
            lines.push(format!(
                "{} interesting methods were never reported",
                self.unreported_interesting.len()
            ));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Writes the summary as plain text.
pub fn print_plain<W: Write>(out: &mut W, summary: &ReportSummary) -> io::Result<()> {
    out.write_all(summary.render_text().as_bytes())
}

/// Writes the summary as pretty JSON.
///
/// Falls back to the plain rendering if serialization fails.
pub fn print_json<W: Write>(out: &mut W, summary: &ReportSummary) -> io::Result<()> {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => writeln!(out, "{}", json),
        Err(e) => {
            tracing::warn!(error = %e, "Summary JSON serialization failed");
            print_plain(out, summary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodDef, TypeDef};

    fn chain(program: &Program, nodes: Vec<Node>, reason: &str) -> FormattedChain {
        let mut lines = vec![format!("---------- ({reason})")];
        lines.extend(nodes.iter().map(|&n| program.display(n)));
        FormattedChain {
            nodes,
            lines,
            reason: Some(Reason::new(reason)),
        }
    }

    fn fixture() -> (Program, Vec<Node>) {
        let mut program = Program::new();
        program.add_type(TypeDef::new("System.Resources.ResourceReader"));
        program.add_type(TypeDef::new("System.Resources.ResourceReader/Enumerator"));
        program.add_type(TypeDef::new("Program"));
        let api = program.add_method(MethodDef::new("System.Type", "GetType"));
        let nested = program.add_method(MethodDef::new(
            "System.Resources.ResourceReader/Enumerator",
            "MoveNext",
        ));
        let global = program.add_method(MethodDef::new("Program", "Main"));
        let gone = program.ensure_method("Gone::Missing()");
        let nodes = [api, nested, global, gone].map(Node::Method).to_vec();
        (program, nodes)
    }

    #[test]
    fn test_categorize_fallbacks() {
        let (program, n) = fixture();
        let categorizer = Categorizer::new(&program, &[]);

        let nested = chain(&program, vec![n[0], n[1]], "R");
        assert_eq!(categorizer.categorize(&nested), "System.Resources");

        let global = chain(&program, vec![n[0], n[2]], "R");
        assert_eq!(categorizer.categorize(&global), "Program");

        let unresolved = chain(&program, vec![n[0], n[3]], "R");
        assert_eq!(categorizer.categorize(&unresolved), RESOLUTION_FAILURE);
    }

    #[test]
    fn test_category_rule_wins() {
        let (program, n) = fixture();
        let rules = vec![CategoryRule {
            name: "resource enumeration".into(),
            frames_containing: vec!["GetType".into(), "::MoveNext(".into()],
        }];
        let categorizer = Categorizer::new(&program, &rules);
        let c = chain(&program, vec![n[0], n[1]], "R");
        assert_eq!(categorizer.categorize(&c), "resource enumeration");

        let other = chain(&program, vec![n[0], n[2]], "R");
        assert_eq!(categorizer.categorize(&other), "Program");
    }

    #[test]
    fn test_state_groups_by_callee_descending() {
        let (program, n) = fixture();
        let mut state = ReportState::new(4, Grouping::Callee);
        state.record(&program, chain(&program, vec![n[1], n[2]], "A"), "x".into(), 1, 2);
        state.record(&program, chain(&program, vec![n[0], n[2]], "B"), "x".into(), 0, 2);
        state.record(&program, chain(&program, vec![n[0], n[1]], "B"), "y".into(), 0, 1);

        assert_eq!(state.chain_count(), 3);
        assert!(state.is_reported(0));
        assert!(!state.is_reported(3));
        let groups = state.take_groups();
        assert_eq!(groups[0].0, n[0]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, n[1]);
    }

    #[test]
    fn test_ungrouped_state_retains_nothing() {
        let (program, n) = fixture();
        let mut state = ReportState::new(4, Grouping::None);
        state.record(&program, chain(&program, vec![n[0], n[2]], "A"), "x".into(), 0, 2);
        assert!(state.take_groups().is_empty());
    }

    #[test]
    fn test_sorted_counts_with_zero_lines() {
        let counts = sorted_counts(
            vec![("a".to_string(), 1), ("b".to_string(), 3)].into_iter(),
            &[Reason::new("b"), Reason::new("c")],
        );
        assert_eq!(
            counts,
            vec![
                Count { name: "b".into(), count: 3 },
                Count { name: "a".into(), count: 1 },
                Count { name: "c".into(), count: 0 },
            ]
        );
    }

    #[test]
    fn test_render_text() {
        let summary = ReportSummary {
            methods: 3,
            entry_methods: 1,
            interesting_methods: 1,
            chains: 1,
            chains_per_category: vec![Count { name: "App".into(), count: 1 }],
            chains_per_reason: vec![Count { name: "KnownReflection".into(), count: 1 }],
            methods_per_reason: vec![
                Count { name: "KnownReflection".into(), count: 1 },
                Count { name: "CreateInstance".into(), count: 0 },
            ],
            namespaces: vec![NamespaceHits {
                namespace: "App".into(),
                hit_types: 1,
                total_types: 2,
            }],
            unreported_interesting: vec![],
        };
        let text = summary.render_text();
        assert!(text.contains("found 1 \"interesting\" methods\n"));
        assert!(text.contains("1 chains are App\n"));
        assert!(text.contains("App: 1 / 2\n"));
        assert!(text.contains("0 methods are CreateInstance\n"));
        assert!(!text.contains("never reported"));

        let mut buf = Vec::new();
        print_json(&mut buf, &summary).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["chains"], 1);
        assert_eq!(v["namespaces"][0]["total_types"], 2);
    }
}
