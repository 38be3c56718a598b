//! Declarative rule table and the classifier it drives.
//!
//! ```toml
//! unanalyzed_reason = "LinkerUnanalyzed"
//!
//! [[rule]]
//! declaring_type = "System.Activator"
//! member = "CreateInstance"
//! parameter_types = ["System.Type"]
//! family = "detected-api"
//! reason = "CreateInstance"
//!
//! [[rule]]
//! declaring_type = "System.LazyHelper"
//! member = "CreateViaDefaultConstructor"
//! family = "annotation"
//! safe = true
//! ```
//!
//! Resolution order for one method:
//!
//! 1. A matching `safe` annotation makes the method safe and never interesting.
//! 2. `annotation` and `detected-api` rules. Two different reasons is a
//!    [`TrimtraceError::ConflictingReasons`].
//! 3. The unanalyzed fallback, if the fact set lists the method.
//! 4. `catch-all` rules, with the same conflict check, unless an `exempt`
//!    catch-all rule also matches.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::{Classifier, Reason};
use crate::error::{IoResultExt, TrimtraceError, TrimtraceResult};
use crate::facts::Facts;
use crate::model::{MethodDef, MethodId, Program};

const BUILTIN_RULES: &str = include_str!("../../rules/reflection.toml");

fn default_unanalyzed_reason() -> String {
    "unanalyzed".to_string()
}

/// Precedence family of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleFamily {
    Annotation,
    DetectedApi,
    CatchAll,
}

/// One `[[rule]]` entry as written in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub declaring_type: Option<String>,
    pub declaring_type_pattern: Option<String>,
    pub member: Option<String>,
    pub member_pattern: Option<String>,
    /// Accepted parameter counts
    pub parameters: Option<Vec<usize>>,
    /// Leading parameter types, matched positionally; `"*"` matches any type
    pub parameter_types: Option<Vec<String>>,
    /// Some parameter, at any position, has this type
    pub any_parameter_type: Option<String>,
    pub family: RuleFamily,
    pub reason: Option<String>,
    #[serde(default)]
    pub safe: bool,
    /// Keeps matching methods out of every `catch-all` bucket
    #[serde(default)]
    pub exempt: bool,
}

/// A whole rule file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleTable {
    /// Reason given to methods the upstream analyzer could not analyze
    #[serde(default = "default_unanalyzed_reason")]
    pub unanalyzed_reason: String,
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleSpec>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            unanalyzed_reason: default_unanalyzed_reason(),
            rules: Vec::new(),
        }
    }
}

impl RuleTable {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[derive(Debug)]
enum Matcher {
    Any,
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    fn compile(exact: Option<String>, pattern: Option<String>, what: &str) -> TrimtraceResult<Self> {
        match (exact, pattern) {
            (Some(_), Some(_)) => Err(TrimtraceError::rule(format!(
                "rule sets both {what} and {what}_pattern"
            ))),
            (Some(s), None) => Ok(Matcher::Exact(s)),
            (None, Some(p)) => Regex::new(&p)
                .map(Matcher::Pattern)
                .map_err(|e| TrimtraceError::rule(format!("invalid {what}_pattern '{p}': {e}"))),
            (None, None) => Ok(Matcher::Any),
        }
    }

    fn is_any(&self) -> bool {
        matches!(self, Matcher::Any)
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Exact(s) => s == value,
            Matcher::Pattern(re) => re.is_match(value),
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Interesting(Reason),
    Safe,
    Exempt,
}

#[derive(Debug)]
struct CompiledRule {
    declaring_type: Matcher,
    member: Matcher,
    parameters: Option<Vec<usize>>,
    parameter_types: Option<Vec<String>>,
    any_parameter_type: Option<String>,
    family: RuleFamily,
    outcome: Outcome,
}

impl CompiledRule {
    fn compile(spec: RuleSpec, index: usize) -> TrimtraceResult<Self> {
        let declaring_type =
            Matcher::compile(spec.declaring_type, spec.declaring_type_pattern, "declaring_type")?;
        let member = Matcher::compile(spec.member, spec.member_pattern, "member")?;
        if declaring_type.is_any() && member.is_any() {
            return Err(TrimtraceError::rule(format!(
                "rule #{index} matches every method; give a declaring type or member"
            )));
        }

        let outcome = match (spec.reason, spec.safe, spec.exempt) {
            (Some(reason), false, false) => Outcome::Interesting(Reason::new(reason)),
            (None, true, false) if spec.family == RuleFamily::Annotation => Outcome::Safe,
            (None, true, false) => {
                return Err(TrimtraceError::rule(format!(
                    "rule #{index}: only annotation rules may mark methods safe"
                )))
            }
            (None, false, true) if spec.family == RuleFamily::CatchAll => Outcome::Exempt,
            (None, false, true) => {
                return Err(TrimtraceError::rule(format!(
                    "rule #{index}: only catch-all rules may be exempt"
                )))
            }
            (None, false, false) => {
                return Err(TrimtraceError::rule(format!(
                    "rule #{index} needs a reason, safe = true or exempt = true"
                )))
            }
            _ => {
                return Err(TrimtraceError::rule(format!(
                    "rule #{index} sets more than one of reason, safe and exempt"
                )))
            }
        };

        Ok(Self {
            declaring_type,
            member,
            parameters: spec.parameters,
            parameter_types: spec.parameter_types,
            any_parameter_type: spec.any_parameter_type,
            family: spec.family,
            outcome,
        })
    }

    fn matches(&self, def: &MethodDef) -> bool {
        if !self.declaring_type.matches(&def.declaring_type) || !self.member.matches(&def.name) {
            return false;
        }
        if let Some(counts) = &self.parameters {
            if !counts.contains(&def.parameters.len()) {
                return false;
            }
        }
        if let Some(types) = &self.parameter_types {
            if def.parameters.len() < types.len()
                || !types
                    .iter()
                    .zip(&def.parameters)
                    .all(|(want, have)| want == "*" || *want == have.type_name)
            {
                return false;
            }
        }
        if let Some(wanted) = &self.any_parameter_type {
            if !def.parameters.iter().any(|p| p.type_name == *wanted) {
                return false;
            }
        }
        true
    }

    fn reason(&self) -> Option<&Reason> {
        match &self.outcome {
            Outcome::Interesting(r) => Some(r),
            Outcome::Safe | Outcome::Exempt => None,
        }
    }
}

/// Classifier driven by a [`RuleTable`] plus the fact set's entry and
/// unanalyzed method sets.
#[derive(Debug)]
pub struct RuleClassifier {
    rules: Vec<CompiledRule>,
    unanalyzed_reason: Reason,
    entries: Option<HashSet<MethodId>>,
    unanalyzed: HashSet<MethodId>,
}

impl RuleClassifier {
    /// Compile a rule table. Regex patterns are compiled here, once.
    pub fn from_table(table: RuleTable) -> TrimtraceResult<Self> {
        let rules = table
            .rules
            .into_iter()
            .enumerate()
            .map(|(i, spec)| CompiledRule::compile(spec, i + 1))
            .collect::<TrimtraceResult<Vec<_>>>()?;
        debug!(rules = rules.len(), "Compiled rule table");
        Ok(Self {
            rules,
            unanalyzed_reason: Reason::new(table.unanalyzed_reason),
            entries: None,
            unanalyzed: HashSet::new(),
        })
    }

    /// The rule table shipped with the crate (reflection and dynamic-code APIs).
    pub fn builtin() -> TrimtraceResult<Self> {
        let table = RuleTable::from_toml_str(BUILTIN_RULES)
            .map_err(|e| TrimtraceError::rule(format!("built-in rule table: {e}")))?;
        Self::from_table(table)
    }

    /// Load and compile a TOML rule file.
    pub fn load(path: &Path) -> TrimtraceResult<Self> {
        let content = fs::read_to_string(path).with_path(path)?;
        let table = RuleTable::from_toml_str(&content)
            .map_err(|e| TrimtraceError::config(path, e.to_string()))?;
        Self::from_table(table)
    }

    /// Take the entry and unanalyzed sets from recorded facts.
    pub fn with_facts(mut self, facts: &Facts) -> Self {
        self.entries = facts
            .entry_methods
            .as_ref()
            .map(|set| set.iter().copied().collect());
        self.unanalyzed = facts.unanalyzed_methods.iter().copied().collect();
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Single reason from the rules of the given families, or a conflict.
    fn reason_from(
        &self,
        def: &MethodDef,
        families: &[RuleFamily],
    ) -> TrimtraceResult<Option<Reason>> {
        let mut found: Option<&Reason> = None;
        for rule in &self.rules {
            if !families.contains(&rule.family) || !rule.matches(def) {
                continue;
            }
            let Some(reason) = rule.reason() else {
                continue;
            };
            match found {
                None => found = Some(reason),
                Some(first) if first != reason => {
                    return Err(TrimtraceError::ConflictingReasons {
                        method: def.key.clone(),
                        first: first.to_string(),
                        second: reason.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(found.cloned())
    }

    fn is_safe(&self, def: &MethodDef) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.outcome, Outcome::Safe) && r.matches(def))
    }

    fn is_exempt(&self, def: &MethodDef) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.outcome, Outcome::Exempt) && r.matches(def))
    }
}

impl Classifier for RuleClassifier {
    fn is_entry(&self, program: &Program, method: MethodId) -> bool {
        if let Some(entries) = &self.entries {
            return entries.contains(&method);
        }
        program.method(method).flags.is_public
            && program.declaring_type(method).is_some_and(|t| t.is_public)
    }

    fn interesting_reason(
        &self,
        program: &Program,
        method: MethodId,
    ) -> TrimtraceResult<Option<Reason>> {
        let def = program.method(method);
        if self.is_safe(def) {
            return Ok(None);
        }
        if let Some(reason) =
            self.reason_from(def, &[RuleFamily::Annotation, RuleFamily::DetectedApi])?
        {
            return Ok(Some(reason));
        }
        if self.unanalyzed.contains(&method) {
            return Ok(Some(self.unanalyzed_reason.clone()));
        }
        if self.is_exempt(def) {
            return Ok(None);
        }
        self.reason_from(def, &[RuleFamily::CatchAll])
    }

    fn is_annotated_safe(&self, program: &Program, method: MethodId) -> bool {
        self.is_safe(program.method(method))
    }

    fn known_reasons(&self) -> Vec<Reason> {
        let mut reasons: Vec<Reason> = self
            .rules
            .iter()
            .filter_map(|r| r.reason().cloned())
            .chain(std::iter::once(self.unanalyzed_reason.clone()))
            .collect();
        reasons.sort();
        reasons.dedup();
        reasons
    }
}
