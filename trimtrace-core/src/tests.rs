//! Scenario test suite for trimtrace-core.

use crate::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn write_file(file: &Path, content: &str) {
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(file, content).unwrap();
}

fn setup_temp_dir() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir()
        .join("trimtrace_tests")
        .join(format!("{}_{}", std::process::id(), id));
    if dir.exists() {
        fs::remove_dir_all(&dir).ok();
    }
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Every chain of a prepared graph, formatted, in source order.
fn all_chains(program: &Program, prepared: &PreparedGraph) -> Vec<(PathResult, FormattedChain)> {
    let compact = &prepared.compact;
    let formatter = Formatter::new(program, &prepared.graph, compact, &prepared.mapping);
    let constraints = SearchConstraints::new(&compact.is_interesting, &compact.is_entry)
        .ignore_edges_to(&compact.is_annotated_safe);
    let mut out = Vec::new();
    all_pairs_search(&compact.callers, &constraints, |r| {
        for &dest in &r.destinations {
            let chain = formatter.format(&r, dest).unwrap();
            out.push((r.clone(), chain));
        }
    });
    out
}

fn key(program: &Program, key: &str) -> MethodId {
    program.method_id(key).unwrap()
}

// Scenario: A -> B -> C with C interesting and A an entry point
#[test]
fn test_straight_chain() {
    let mut rec = FactRecorder::new();
    let a = rec.method(MethodDef::new("App.A", "Run"));
    let b = rec.method(MethodDef::new("App.B", "Step"));
    let c = rec.method(MethodDef::new("App.C", "Reflect"));
    rec.record_direct_call(a, b);
    rec.record_direct_call(b, c);
    let (program, facts) = rec.into_parts();
    let classifier = SetClassifier::new().entry(a).interesting(c, "KnownReflection");

    let prepared = TrimAnalysis::new(&program, &facts, &classifier)
        .prepare()
        .unwrap();
    let chains = all_chains(&program, &prepared);
    assert_eq!(chains.len(), 1);

    let (result, chain) = &chains[0];
    assert_eq!(
        chain.nodes,
        vec![Node::Method(c), Node::Method(b), Node::Method(a)]
    );
    let dest = prepared.mapping.index(Node::Method(a)).unwrap();
    assert_eq!(result.dist[dest], 2);
}

// Scenario: same chain with B annotated safe
#[test]
fn test_safe_method_blocks_chain() {
    let mut rec = FactRecorder::new();
    let a = rec.method(MethodDef::new("App.A", "Run"));
    let b = rec.method(MethodDef::new("App.B", "Step"));
    let c = rec.method(MethodDef::new("App.C", "Reflect"));
    rec.record_direct_call(a, b);
    rec.record_direct_call(b, c);
    let (program, facts) = rec.into_parts();
    let classifier = SetClassifier::new()
        .entry(a)
        .interesting(c, "KnownReflection")
        .safe(b);

    let report = TrimAnalysis::new(&program, &facts, &classifier)
        .run(Vec::new())
        .unwrap();
    assert_eq!(report.summary.chains, 0);
    assert!(report.output.is_empty());
    assert_eq!(report.summary.unreported_interesting.len(), 1);
}

// Scenario: A -> C2 -> D -> C1, both C's interesting
#[test]
fn test_no_chain_through_second_interesting_method() {
    let mut rec = FactRecorder::new();
    let a = rec.method(MethodDef::new("App.A", "Run"));
    let c2 = rec.method(MethodDef::new("App.C2", "Load"));
    let d = rec.method(MethodDef::new("App.D", "Step"));
    let c1 = rec.method(MethodDef::new("App.C1", "Invoke"));
    rec.record_direct_call(a, c2);
    rec.record_direct_call(c2, d);
    rec.record_direct_call(d, c1);
    let (program, facts) = rec.into_parts();
    let classifier = SetClassifier::new()
        .entry(a)
        .interesting(c1, "Invoke")
        .interesting(c2, "AssemblyLoad");

    let prepared = TrimAnalysis::new(&program, &facts, &classifier)
        .prepare()
        .unwrap();
    let chains = all_chains(&program, &prepared);
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].1.source(), Node::Method(c2));
    assert_eq!(chains[0].1.nodes, vec![Node::Method(c2), Node::Method(a)]);

    let report = TrimAnalysis::new(&program, &facts, &classifier)
        .run(Vec::new())
        .unwrap();
    assert_eq!(report.summary.chains, 1);
    assert_eq!(
        report.summary.unreported_interesting,
        vec!["App.C1::Invoke() -> System.Void".to_string()]
    );
}

// Scenario: M calls virtual V, overridden by O1 and O2
#[test]
fn test_virtual_call_resolves_to_overrides() {
    let mut rec = FactRecorder::new();
    let m = rec.method(MethodDef::new("App.Caller", "M"));
    let v = rec.method(MethodDef::new("App.Base", "V").virtual_());
    let o1 = rec.method(MethodDef::new("App.First", "V").virtual_());
    let o2 = rec.method(MethodDef::new("App.Second", "V").virtual_());
    rec.record_virtual_call(m, v);
    rec.record_override(v, o1);
    rec.record_override(v, o2);
    let (program, facts) = rec.into_parts();

    let graph = DependencyGraph::build(&program, &facts);
    assert!(graph.contains_edge(m, o1, EdgeKind::VirtualCallToVirtual));
    assert!(graph.contains_edge(m, o2, EdgeKind::VirtualCallToVirtual));
    assert!(!graph.contains_edge(m, v, EdgeKind::VirtualCallToVirtual));
    assert!(!graph.contains_node(Node::Method(v)));
}

// Scenario: an interesting override only reached through dispatch keeps its
// chain through the constructor of its type
#[test]
fn test_constructor_dependency_chain_end_to_end() {
    let mut rec = FactRecorder::new();
    let main = rec.method(MethodDef::new("App.Program", "Main"));
    let ctor = rec.method(MethodDef::new("App.Plugin", ".ctor").constructor());
    let base = rec.method(MethodDef::new("App.PluginBase", "Load").abstract_());
    let load = rec.method(MethodDef::new("App.Plugin", "Load").virtual_());
    rec.record_direct_call(main, ctor);
    rec.record_virtual_call(main, base);
    rec.record_override(base, load);
    let (program, facts) = rec.into_parts();
    let classifier = SetClassifier::new().entry(main).interesting(load, "Plugin");

    let report = TrimAnalysis::new(&program, &facts, &classifier)
        .run(Vec::new())
        .unwrap();
    assert_eq!(report.stats.virtual_edges_removed, 1);
    assert_eq!(report.stats.constructor_edges_added, 1);
    assert_eq!(report.summary.chains, 1);
    let text = String::from_utf8(report.output).unwrap();
    assert!(text.contains("App.Plugin::Load() -> System.Void\n-- constructor dependency\nApp.Plugin::.ctor() -> System.Void\n"));
}

#[test]
fn test_remove_methods_leaves_no_incident_edge() {
    let mut rec = FactRecorder::new();
    let ids: Vec<MethodId> = (0..6)
        .map(|i| rec.method(MethodDef::new("App.T", format!("M{i}"))))
        .collect();
    for i in 0..6 {
        for j in 0..6 {
            if (i + 2 * j) % 3 == 0 && i != j {
                rec.record_direct_call(ids[i], ids[j]);
            }
        }
    }
    let ty = rec.type_def(TypeDef::new("App.T"));
    rec.record_type_reference(ids[1], ty);
    let (program, facts) = rec.into_parts();

    let mut graph = DependencyGraph::build(&program, &facts);
    let doomed: HashSet<Node> = [Node::Method(ids[1]), Node::Method(ids[4])].into_iter().collect();
    graph.remove_methods(doomed.iter().copied());

    for e in graph.edges() {
        assert!(!doomed.contains(&e.from) && !doomed.contains(&e.to), "{e:?}");
    }
    for node in &doomed {
        assert!(!graph.contains_node(*node));
    }
    assert!(!graph.contains_node(Node::Type(ty)));
}

/// Two entries, a safe wrapper and interesting methods calling each other.
fn mixed_fixture() -> (Program, Facts, SetClassifier) {
    let mut rec = FactRecorder::new();
    let main = rec.method(MethodDef::new("App.Program", "Main"));
    let other = rec.method(MethodDef::new("App.Other", "Start"));
    let a = rec.method(MethodDef::new("App.Program", "A"));
    let b = rec.method(MethodDef::new("App.Program", "B"));
    let c = rec.method(MethodDef::new("App.Program", "C"));
    let safe = rec.method(MethodDef::new("App.Safe", "Wrap"));
    let load = rec.method(MethodDef::new("System.Reflection.Assembly", "Load"));
    let get_type = rec.method(MethodDef::new("System.Type", "GetType"));
    let invoke = rec.method(MethodDef::new("System.Reflection.MethodBase", "Invoke"));
    rec.record_direct_call(main, a);
    rec.record_direct_call(a, load);
    rec.record_direct_call(main, safe);
    rec.record_direct_call(safe, get_type);
    rec.record_direct_call(main, b);
    rec.record_direct_call(b, load);
    rec.record_direct_call(b, c);
    rec.record_direct_call(c, invoke);
    rec.record_direct_call(load, invoke);
    rec.record_direct_call(other, invoke);
    rec.record_direct_call(a, main);
    let (program, facts) = rec.into_parts();
    let classifier = SetClassifier::new()
        .entry(main)
        .entry(other)
        .interesting(load, "AssemblyLoad")
        .interesting(get_type, "KnownReflection")
        .interesting(invoke, "Invoke")
        .safe(safe);
    (program, facts, classifier)
}

#[test]
fn test_chain_properties() {
    let (program, facts, classifier) = mixed_fixture();
    let prepared = TrimAnalysis::new(&program, &facts, &classifier)
        .prepare()
        .unwrap();
    let compact = &prepared.compact;
    let chains = all_chains(&program, &prepared);
    assert!(!chains.is_empty());

    for (result, chain) in &chains {
        let indices: Vec<usize> = chain
            .nodes
            .iter()
            .map(|&n| prepared.mapping.index(n).unwrap())
            .collect();

        // Only the source is interesting
        assert!(compact.is_interesting[indices[0]]);
        assert!(indices[1..].iter().all(|&i| !compact.is_interesting[i]));

        // Nothing past a safe method
        assert!(indices.iter().all(|&i| !compact.is_annotated_safe[i]));

        // dist is the hop count along prev
        let dest = *indices.last().unwrap();
        assert_eq!(result.dist[dest] as usize, indices.len() - 1);
        assert_eq!(result.path_to(dest).unwrap(), indices);
    }

    let get_type = key(&program, "System.Type::GetType()");
    assert!(chains
        .iter()
        .all(|(_, c)| c.source() != Node::Method(get_type)));
}

#[test]
fn test_reachability_idempotent_after_prune() {
    let (program, facts, classifier) = mixed_fixture();
    let prepared = TrimAnalysis::new(&program, &facts, &classifier)
        .prepare()
        .unwrap();
    let filter = ReachabilityFilter::compute(&prepared.compact);
    assert!(filter.prune_set().is_empty());
    assert_eq!(
        filter.prune_set(),
        ReachabilityFilter::compute(&prepared.compact).prune_set()
    );
}

#[test]
fn test_second_constructor_pass_is_invariant_error() {
    let (program, facts, classifier) = mixed_fixture();
    let mut graph = DependencyGraph::build(&program, &facts);
    graph.add_constructor_edges(&program, &classifier).unwrap();
    let err = graph.add_constructor_edges(&program, &classifier).unwrap_err();
    assert!(matches!(err, TrimtraceError::Invariant { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_conflicting_reasons_abort_run() {
    let mut rec = FactRecorder::new();
    let main = rec.method(MethodDef::new("App.Program", "Main"));
    let load = rec.method(MethodDef::new("System.Reflection.Assembly", "Load"));
    rec.record_direct_call(main, load);
    let (program, facts) = rec.into_parts();

    let table = RuleTable::from_toml_str(
        r#"
        [[rule]]
        declaring_type = "System.Reflection.Assembly"
        member = "Load"
        family = "detected-api"
        reason = "AssemblyLoad"

        [[rule]]
        declaring_type = "System.Reflection.Assembly"
        member_pattern = "^Lo"
        family = "annotation"
        reason = "Curated"
        "#,
    )
    .unwrap();
    let classifier = RuleClassifier::from_table(table).unwrap().with_facts(&facts);

    let err = TrimAnalysis::new(&program, &facts, &classifier)
        .run(Vec::new())
        .unwrap_err();
    assert!(matches!(err, TrimtraceError::ConflictingReasons { .. }));
}

const FACTS_JSON: &str = r#"{
    "types": [
        { "full_name": "App.Program", "is_public": true },
        { "full_name": "App.Plugins", "is_public": true }
    ],
    "methods": [
        { "declaring_type": "App.Program", "name": "Main", "is_public": true, "is_static": true },
        { "declaring_type": "App.Program", "name": "Configure" },
        { "declaring_type": "App.Plugins", "name": "LoadAll" },
        { "key": "System.Activator::CreateInstance(System.Type)",
          "declaring_type": "System.Activator", "name": "CreateInstance",
          "parameters": [{ "type": "System.Type", "name": "type" }],
          "return_type": "System.Object", "is_public": true, "is_static": true },
        { "key": "System.Type::GetMethod(System.String)",
          "declaring_type": "System.Type", "name": "GetMethod",
          "parameters": [{ "type": "System.String", "name": "name" }],
          "return_type": "System.Reflection.MethodInfo", "is_public": true }
    ],
    "direct_calls": [
        ["App.Program::Main()", "App.Program::Configure()"],
        ["App.Program::Configure()", "App.Plugins::LoadAll()"],
        ["App.Plugins::LoadAll()", "System.Activator::CreateInstance(System.Type)"],
        ["App.Program::Configure()", "System.Type::GetMethod(System.String)"]
    ],
    "entry_methods": ["App.Program::Main()"],
    "resolved_reflection_calls": [
        ["App.Program::Configure()", "System.Type::GetMethod(System.String)"]
    ]
}"#;

// End to end: fact file, builtin rules, trimtrace.toml
#[test]
fn test_end_to_end_from_files() {
    let root = setup_temp_dir();
    write_file(&root.join("facts.json"), FACTS_JSON);
    write_file(
        &root.join(CONFIG_FILE_NAME),
        r#"
        [output]
        format = "json"
        grouping = "callee"

        [[category]]
        name = "plugins"
        frames_containing = ["App.Plugins::LoadAll"]
        "#,
    );

    let config = load_config(&root).unwrap().unwrap();
    let (program, facts) = FactRecorder::load(&root.join("facts.json"))
        .unwrap()
        .into_parts();
    let classifier = config.classifier(&root).unwrap().with_facts(&facts);

    let report = TrimAnalysis::new(&program, &facts, &classifier)
        .with_options(config.analysis_options())
        .run(Vec::new())
        .unwrap();

    assert_eq!(report.stats.resolved_calls_removed, 1);
    assert_eq!(report.summary.entry_methods, 1);
    assert_eq!(report.summary.interesting_methods, 1);
    assert_eq!(report.summary.chains, 1);
    assert_eq!(report.summary.chains_per_category[0].name, "plugins");
    assert_eq!(report.summary.chains_per_reason[0].name, "CreateInstance");

    let v: serde_json::Value = serde_json::from_slice(&report.output).unwrap();
    let group = v["System.Activator::CreateInstance(System.Type type) -> System.Object"]
        .as_array()
        .unwrap();
    assert_eq!(group.len(), 1);
    let lines: Vec<&str> = group[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l.as_str().unwrap())
        .collect();
    assert_eq!(
        lines,
        vec![
            "---------- (CreateInstance)",
            "System.Activator::CreateInstance(System.Type type) -> System.Object",
            "App.Plugins::LoadAll() -> System.Void",
            "App.Program::Configure() -> System.Void",
            "App.Program::Main() -> System.Void",
        ]
    );

    let text = report.summary.render_text();
    assert!(text.contains("1 chains are plugins\n"));
    assert!(text.contains("0 methods are KnownReflection\n"));

    fs::remove_dir_all(&root).ok();
}

#[test]
fn test_missing_fact_file_is_io_error() {
    let root = setup_temp_dir();
    let err = FactRecorder::load(&root.join("nope.json")).unwrap_err();
    assert!(matches!(err, TrimtraceError::Io { .. }));
    assert_eq!(err.path(), Some(&root.join("nope.json")));
}

#[test]
fn test_malformed_fact_file_is_facts_error() {
    let root = setup_temp_dir();
    write_file(&root.join("facts.json"), "{ \"direct_calls\": 7 }");
    let err = FactRecorder::load(&root.join("facts.json")).unwrap_err();
    assert!(matches!(err, TrimtraceError::Facts { .. }));
}

// Scenario: Outer -> Main with Main both an entry point and interesting
#[test]
fn test_interesting_entry_point_is_one_frame_chain() {
    let mut rec = FactRecorder::new();
    let outer = rec.method(MethodDef::new("App.Host", "Outer"));
    let main = rec.method(MethodDef::new("App.Program", "Main"));
    rec.record_direct_call(outer, main);
    let (program, facts) = rec.into_parts();
    let classifier = SetClassifier::new()
        .entry(main)
        .interesting(main, "KnownReflection");

    let analysis = TrimAnalysis::new(&program, &facts, &classifier);
    let prepared = analysis.prepare().unwrap();
    assert!(prepared.graph.contains_node(Node::Method(main)));

    let report = analysis.run_prepared(&prepared, Vec::new()).unwrap();
    assert_eq!(report.summary.chains, 1);
    assert!(report.summary.unreported_interesting.is_empty());
    assert_eq!(
        String::from_utf8(report.output).unwrap(),
        "---------- (KnownReflection)\n\
         App.Program::Main() -> System.Void\n\n"
    );
}
