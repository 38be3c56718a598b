//! Method classification: entry points, interesting methods, safe methods.
//!
//! The engine never decides on its own which methods matter. It asks a
//! [`Classifier`] once per method node while compacting the graph and caches
//! the answers as flag arrays.

pub mod rules;

pub use rules::{RuleClassifier, RuleFamily, RuleSpec, RuleTable};

use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TrimtraceResult;
use crate::model::{MethodId, Program};

/// Opaque tag explaining why a method is interesting.
///
/// Cheap to clone. Ordering and equality follow the tag text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reason(Arc<str>);

impl Reason {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(Arc::from(tag.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl From<&str> for Reason {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Answers the three questions the engine asks about each method.
///
/// Implementations must be deterministic: the same method always gets the
/// same answers within one run.
pub trait Classifier: Sync {
    /// True when the method is part of the public/entry surface.
    fn is_entry(&self, program: &Program, method: MethodId) -> bool;

    /// The reason the method is interesting, or `None`.
    ///
    /// Fails when independent rules give the method two different reasons.
    fn interesting_reason(
        &self,
        program: &Program,
        method: MethodId,
    ) -> TrimtraceResult<Option<Reason>>;

    /// True when the method is annotated as safe. Chains never pass through
    /// a safe method.
    fn is_annotated_safe(&self, program: &Program, method: MethodId) -> bool;

    /// Every reason this classifier can produce, for zero-count summary lines.
    fn known_reasons(&self) -> Vec<Reason> {
        Vec::new()
    }
}

/// Classifier backed by precomputed sets.
#[derive(Debug, Clone, Default)]
pub struct SetClassifier {
    entries: HashSet<MethodId>,
    interesting: HashMap<MethodId, Reason>,
    safe: HashSet<MethodId>,
}

impl SetClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, method: MethodId) -> Self {
        self.entries.insert(method);
        self
    }

    pub fn interesting(mut self, method: MethodId, reason: impl Into<Reason>) -> Self {
        self.interesting.insert(method, reason.into());
        self
    }

    pub fn safe(mut self, method: MethodId) -> Self {
        self.safe.insert(method);
        self
    }
}

impl Classifier for SetClassifier {
    fn is_entry(&self, _program: &Program, method: MethodId) -> bool {
        self.entries.contains(&method)
    }

    fn interesting_reason(
        &self,
        _program: &Program,
        method: MethodId,
    ) -> TrimtraceResult<Option<Reason>> {
        Ok(self.interesting.get(&method).cloned())
    }

    fn is_annotated_safe(&self, _program: &Program, method: MethodId) -> bool {
        self.safe.contains(&method)
    }

    fn known_reasons(&self) -> Vec<Reason> {
        let mut reasons: Vec<Reason> = self.interesting.values().cloned().collect();
        reasons.sort();
        reasons.dedup();
        reasons
    }
}

/// Remembers each method's [`Classifier::interesting_reason`] answer so
/// one run asks the wrapped classifier once per method.
///
/// Errors are not remembered.
pub struct CachedClassifier<'a> {
    inner: &'a dyn Classifier,
    reasons: Mutex<HashMap<MethodId, Option<Reason>>>,
}

impl<'a> CachedClassifier<'a> {
    pub fn new(inner: &'a dyn Classifier) -> Self {
        Self {
            inner,
            reasons: Mutex::new(HashMap::new()),
        }
    }
}

impl Classifier for CachedClassifier<'_> {
    fn is_entry(&self, program: &Program, method: MethodId) -> bool {
        self.inner.is_entry(program, method)
    }

    fn interesting_reason(
        &self,
        program: &Program,
        method: MethodId,
    ) -> TrimtraceResult<Option<Reason>> {
        let cached = self
            .reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&method)
            .cloned();
        if let Some(reason) = cached {
            return Ok(reason);
        }
        let reason = self.inner.interesting_reason(program, method)?;
        self.reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method, reason.clone());
        Ok(reason)
    }

    fn is_annotated_safe(&self, program: &Program, method: MethodId) -> bool {
        self.inner.is_annotated_safe(program, method)
    }

    fn known_reasons(&self) -> Vec<Reason> {
        self.inner.known_reasons()
    }
}
