//! Configuration loading from trimtrace.toml.
//!
//! ```toml
//! [output]
//! format = "json"
//! grouping = "callee"
//!
//! [search]
//! parallel = true
//! ignore_virtual_callers = false
//! stop_at_untracked_static_constructors = false
//!
//! [[search.suppress]]
//! caller = "App.Startup::Configure()"
//! callee = "App.Plugins::LoadAll()"
//!
//! [[category]]
//! name = "serialization"
//! frames_containing = ["System.Runtime.Serialization"]
//!
//! [rules]
//! path = "rules/reflection.toml"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::analysis::{AnalysisOptions, SuppressedCall};
use crate::classify::{RuleClassifier, RuleSpec, RuleTable};
use crate::report::{CategoryRule, Grouping};

pub const CONFIG_FILE_NAME: &str = "trimtrace.toml";

/// Main configuration structure for trimtrace.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrimtraceConfig {
    pub output: Option<OutputConfig>,
    pub search: Option<SearchConfig>,
    #[serde(default)]
    pub category: Vec<CategoryRule>,
    pub rules: Option<RulesConfig>,
}

/// Chain output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Output configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub format: Option<OutputFormat>,
    pub grouping: Option<Grouping>,
}

/// Search configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    pub parallel: Option<bool>,
    pub ignore_virtual_callers: Option<bool>,
    pub stop_at_untracked_static_constructors: Option<bool>,
    #[serde(default)]
    pub suppress: Vec<SuppressedCall>,
}

/// Rule table: a file path, inline `[[rules.rule]]` entries, or neither
/// for the built-in table.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    /// Relative to the directory holding trimtrace.toml
    pub path: Option<PathBuf>,
    pub unanalyzed_reason: Option<String>,
    #[serde(default)]
    pub rule: Vec<RuleSpec>,
}

/// Loads configuration from `root/trimtrace.toml` if it exists.
pub fn load_config(root: &Path) -> Result<Option<TrimtraceConfig>> {
    let path = root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Loads configuration from an explicit file.
pub fn load_config_file(path: &Path) -> Result<TrimtraceConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg = toml::from_str(&content)
        .with_context(|| format!("Invalid {}", path.display()))?;
    Ok(cfg)
}

impl TrimtraceConfig {
    /// Analysis options described by this file. Unset keys keep defaults.
    pub fn analysis_options(&self) -> AnalysisOptions {
        let mut options = AnalysisOptions::default();
        if let Some(output) = &self.output {
            options.json = output.format == Some(OutputFormat::Json);
            options.grouping = output.grouping.unwrap_or_default();
        }
        if let Some(search) = &self.search {
            options.parallel = search.parallel.unwrap_or(false);
            options.ignore_virtual_callers = search.ignore_virtual_callers.unwrap_or(false);
            options.stop_at_untracked_static_constructors =
                search.stop_at_untracked_static_constructors.unwrap_or(false);
            options.suppressed_calls = search.suppress.clone();
        }
        options.category_rules = self.category.clone();
        options
    }

    /// Build the rule classifier. `base_dir` resolves a relative rule path.
    pub fn classifier(&self, base_dir: &Path) -> Result<RuleClassifier> {
        let Some(rules) = &self.rules else {
            return RuleClassifier::builtin().context("Failed to compile built-in rules");
        };
        if let Some(path) = &rules.path {
            let path = base_dir.join(path);
            return RuleClassifier::load(&path)
                .with_context(|| format!("Failed to load rules from {}", path.display()));
        }
        if rules.rule.is_empty() {
            return RuleClassifier::builtin().context("Failed to compile built-in rules");
        }
        let mut table = RuleTable {
            rules: rules.rule.clone(),
            ..RuleTable::default()
        };
        if let Some(reason) = &rules.unanalyzed_reason {
            table.unanalyzed_reason = reason.clone();
        }
        RuleClassifier::from_table(table).context("Invalid inline rules in trimtrace.toml")
    }
}
