//! trimtrace CLI - explains why dangerous APIs are reachable.
//!
//! Features:
//! - JSON fact file input, built-in or custom TOML rule tables
//! - trimtrace.toml configuration with command-line overrides
//! - Streamed text/JSON chains, optionally grouped by callee or caller
//! - Rayon-powered parallel search
//! - Graphviz DOT export of the reduced graph

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use trimtrace_core::{
    generate_dot, init_structured_logging, load_config, load_config_file, log_error, log_info,
    log_warn, print_json, print_plain, AnalysisOptions, FactRecorder, Grouping, RuleClassifier,
    TrimAnalysis, TrimtraceConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Explains why dangerous APIs are reachable")]
pub struct Cli {
    /// JSON fact file produced by the metadata reader
    facts: PathBuf,

    /// Rule table (TOML) replacing the configured or built-in rules
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Configuration file (default: trimtrace.toml next to the fact file)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output chains in JSON format
    #[arg(long)]
    json: bool,

    /// Group chains by interesting method (callee) or entry point (caller)
    #[arg(long, value_name = "none|callee|caller")]
    group: Option<Grouping>,

    /// Write chains to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    output: Option<String>,

    /// Generate Graphviz DOT output for the reduced graph instead of chains
    #[arg(long)]
    dot: bool,

    /// Write DOT output to a specified file instead of stdout
    #[arg(long, value_name = "FILE")]
    dot_file: Option<String>,

    /// Search interesting methods in parallel
    #[arg(long)]
    parallel: bool,

    /// Do not look for callers of virtual methods
    #[arg(long)]
    ignore_virtual_callers: bool,

    /// Also end chains at static constructors no field access explains
    #[arg(long)]
    stop_at_untracked_static_constructors: bool,

    /// Print the summary as JSON
    #[arg(long)]
    summary_json: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Output paths may be absolute or relative. Only NUL bytes are rejected.
fn validate_output_path(path: &str) -> Result<PathBuf> {
    if path.contains('\0') {
        return Err(anyhow!("Output path contains null bytes"));
    }
    Ok(PathBuf::from(path))
}

/// Config from `--config`, or trimtrace.toml beside the fact file.
fn resolve_config(cli: &Cli) -> Result<(Option<TrimtraceConfig>, PathBuf)> {
    if let Some(path) = &cli.config {
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        return Ok((Some(load_config_file(path)?), base));
    }
    let base = cli
        .facts
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok((load_config(&base)?, base))
}

/// Command-line flags win over the config file.
fn merge_options(cli: &Cli, config: Option<&TrimtraceConfig>) -> AnalysisOptions {
    let mut options = config
        .map(TrimtraceConfig::analysis_options)
        .unwrap_or_default();
    options.json |= cli.json;
    if let Some(grouping) = cli.group {
        options.grouping = grouping;
    }
    options.parallel |= cli.parallel;
    options.ignore_virtual_callers |= cli.ignore_virtual_callers;
    options.stop_at_untracked_static_constructors |= cli.stop_at_untracked_static_constructors;
    options
}

fn write_to(path: &Option<String>, content: &str, what: &str) -> Result<()> {
    match path {
        Some(path) => {
            let path = validate_output_path(path)?;
            fs::write(&path, content)
                .with_context(|| format!("Failed to write {} to {}", what, path.display()))?;
            log_info(&format!("Wrote {} to {}", what, path.display()));
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Runs the analysis; returns the process exit code.
fn run(cli: &Cli) -> Result<i32> {
    let (config, base_dir) = resolve_config(cli)?;

    let recorder = FactRecorder::load(&cli.facts)
        .with_context(|| format!("Failed to load facts from {}", cli.facts.display()))?;
    let (program, facts) = recorder.into_parts();
    log_info(&format!(
        "Loaded {} methods, {} types, {} fact tuples",
        program.method_count(),
        program.type_count(),
        facts.tuple_count()
    ));

    let classifier = match (&cli.rules, &config) {
        (Some(path), _) => RuleClassifier::load(path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?,
        (None, Some(cfg)) => cfg.classifier(&base_dir)?,
        (None, None) => RuleClassifier::builtin()?,
    }
    .with_facts(&facts);

    let options = merge_options(cli, config.as_ref());
    let analysis = TrimAnalysis::new(&program, &facts, &classifier).with_options(options);
    let prepared = analysis.prepare().context("Failed to prepare dependency graph")?;

    if cli.dot || cli.dot_file.is_some() {
        let dot = generate_dot(&prepared, &program);
        write_to(&cli.dot_file, &dot, "DOT graph")?;
        return Ok(0);
    }

    let sink: Box<dyn Write + Send> = match &cli.output {
        Some(path) => {
            let path = validate_output_path(path)?;
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let report = analysis
        .run_prepared(&prepared, sink)
        .context("Analysis failed")?;
    drop(report.output);

    let unreported = report.summary.unreported_interesting.len();
    if unreported > 0 {
        log_warn(&format!(
            "{} interesting methods were never reported; the call graph may be incomplete",
            unreported
        ));
    }

    let mut err = io::stderr();
    if cli.summary_json {
        print_json(&mut err, &report.summary)?;
    } else {
        print_plain(&mut err, &report.summary)?;
    }

    Ok(if report.summary.chains == 0 { 0 } else { 1 })
}

fn main() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("[PANIC] trimtrace internal error: {}", info);
        eprintln!("[PANIC] The process will exit with code 2.");
    }));

    let cli = Cli::parse();
    init_structured_logging(cli.log_json);

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log_error(&format!("{:#}", e));
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_output_path() {
        assert!(validate_output_path("chains.json").is_ok());
        assert!(validate_output_path("out/chains.json").is_ok());
        assert_eq!(
            validate_output_path("/tmp/trimtrace/chains.json").unwrap(),
            PathBuf::from("/tmp/trimtrace/chains.json")
        );
        assert!(validate_output_path("../reports/chains.dot").is_ok());
        assert!(validate_output_path("a\0b").is_err());
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "trimtrace",
            "facts.json",
            "--group",
            "caller",
            "--json",
            "--parallel",
        ])
        .unwrap();
        assert_eq!(cli.facts, PathBuf::from("facts.json"));
        assert_eq!(cli.group, Some(Grouping::Caller));
        assert!(cli.json && cli.parallel && !cli.dot);

        assert!(Cli::try_parse_from(["trimtrace", "facts.json", "--group", "nope"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let config: TrimtraceConfig =
            toml_config("[output]\nformat = \"json\"\ngrouping = \"callee\"\n");
        let cli = Cli::try_parse_from(["trimtrace", "f.json", "--group", "caller"]).unwrap();
        let options = merge_options(&cli, Some(&config));
        assert!(options.json);
        assert_eq!(options.grouping, Grouping::Caller);

        let cli = Cli::try_parse_from(["trimtrace", "f.json"]).unwrap();
        let options = merge_options(&cli, None);
        assert!(!options.json);
        assert_eq!(options.grouping, Grouping::None);
    }

    fn toml_config(content: &str) -> TrimtraceConfig {
        let dir = std::env::temp_dir().join(format!("trimtrace_cli_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trimtrace.toml");
        fs::write(&path, content).unwrap();
        load_config_file(&path).unwrap()
    }
}
