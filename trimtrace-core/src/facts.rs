//! Raw dependency facts and the recorder that collects them.
//!
//! The metadata reader is an external collaborator. It either drives a
//! [`FactRecorder`] directly or writes a JSON fact file:
//!
//! ```json
//! {
//!   "methods": [{ "declaring_type": "App.Main", "name": "Run", "is_public": true }],
//!   "types": [{ "full_name": "App.Main", "is_public": true }],
//!   "direct_calls": [["App.Main::Run()", "System.Type::GetMethod()"]],
//!   "entry_methods": ["App.Main::Run()"]
//! }
//! ```
//!
//! Tuples with an empty endpoint are skipped. Endpoints that were never
//! described are interned as unresolved placeholders.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{IoResultExt, TrimtraceError, TrimtraceResult};
use crate::model::{MethodDef, MethodFlags, MethodId, Parameter, Program, TypeDef, TypeId};

/// Resolved fact tuples over program handles.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    pub direct_calls: IndexSet<(MethodId, MethodId)>,
    pub virtual_calls: IndexSet<(MethodId, MethodId)>,
    /// `(base, overriding)`
    pub overrides: IndexSet<(MethodId, MethodId)>,
    /// `(type, static constructor)`
    pub static_constructor_dependencies: IndexSet<(TypeId, MethodId)>,
    /// `(accessing method, static constructor)`
    pub field_access_dependencies: IndexSet<(MethodId, MethodId)>,
    /// `(method, type)`
    pub type_dependencies: IndexSet<(MethodId, TypeId)>,
    /// Explicit entry surface; `None` when the reader did not record one
    pub entry_methods: Option<IndexSet<MethodId>>,
    /// Methods the upstream analyzer could not analyze
    pub unanalyzed_methods: IndexSet<MethodId>,
    /// `(caller, reflection API)` calls the upstream analyzer understood
    pub resolved_reflection_calls: IndexSet<(MethodId, MethodId)>,
}

impl Facts {
    /// Total number of recorded tuples (entry and unanalyzed sets excluded).
    pub fn tuple_count(&self) -> usize {
        self.direct_calls.len()
            + self.virtual_calls.len()
            + self.overrides.len()
            + self.static_constructor_dependencies.len()
            + self.field_access_dependencies.len()
            + self.type_dependencies.len()
    }
}

/// Collects metadata and fact tuples.
#[derive(Debug, Default)]
pub struct FactRecorder {
    program: Program,
    facts: Facts,
}

impl FactRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe a method.
    pub fn method(&mut self, def: MethodDef) -> MethodId {
        self.program.add_method(def)
    }

    /// Describe a type.
    pub fn type_def(&mut self, def: TypeDef) -> TypeId {
        self.program.add_type(def)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn record_direct_call(&mut self, caller: MethodId, callee: MethodId) {
        self.facts.direct_calls.insert((caller, callee));
    }

    pub fn record_virtual_call(&mut self, caller: MethodId, callee: MethodId) {
        self.facts.virtual_calls.insert((caller, callee));
    }

    pub fn record_override(&mut self, base: MethodId, overriding: MethodId) {
        self.facts.overrides.insert((base, overriding));
    }

    pub fn record_static_constructor(&mut self, ty: TypeId, cctor: MethodId) {
        self.facts.static_constructor_dependencies.insert((ty, cctor));
    }

    pub fn record_field_access(&mut self, accessor: MethodId, cctor: MethodId) {
        self.facts.field_access_dependencies.insert((accessor, cctor));
    }

    pub fn record_type_reference(&mut self, method: MethodId, ty: TypeId) {
        self.facts.type_dependencies.insert((method, ty));
    }

    pub fn record_entry(&mut self, method: MethodId) {
        self.facts
            .entry_methods
            .get_or_insert_with(IndexSet::new)
            .insert(method);
    }

    pub fn record_unanalyzed(&mut self, method: MethodId) {
        self.facts.unanalyzed_methods.insert(method);
    }

    pub fn record_resolved_reflection_call(&mut self, caller: MethodId, reflection_api: MethodId) {
        self.facts
            .resolved_reflection_calls
            .insert((caller, reflection_api));
    }

    /// Finish recording.
    pub fn into_parts(self) -> (Program, Facts) {
        (self.program, self.facts)
    }

    /// Build a recorder from the serialized form.
    pub fn from_raw(raw: RawFacts) -> Self {
        let mut rec = Self::new();

        for t in raw.types {
            let mut def = TypeDef::new(t.full_name);
            if let Some(ns) = t.namespace {
                def.namespace = ns;
            }
            if t.enclosing.is_some() {
                def.enclosing = t.enclosing;
            }
            def.is_interface = t.is_interface;
            def.is_public = t.is_public;
            rec.type_def(def);
        }

        for m in raw.methods {
            let mut def = MethodDef::new(m.declaring_type, m.name).with_flags(m.flags);
            def.parameters = m.parameters;
            if let Some(ret) = m.return_type {
                def.return_type = ret;
            }
            if let Some(key) = m.key {
                def.key = key;
            }
            rec.method(def);
        }

        let mut unresolved = 0usize;
        let mut skipped = 0usize;

        macro_rules! pairs {
            ($list:expr, $resolve_a:ident, $resolve_b:ident, $record:ident) => {
                for (a, b) in $list {
                    match (
                        rec.$resolve_a(&a, &mut unresolved),
                        rec.$resolve_b(&b, &mut unresolved),
                    ) {
                        (Some(a), Some(b)) => rec.$record(a, b),
                        _ => skipped += 1,
                    }
                }
            };
        }

        pairs!(raw.direct_calls, resolve_method, resolve_method, record_direct_call);
        pairs!(raw.virtual_calls, resolve_method, resolve_method, record_virtual_call);
        pairs!(raw.overrides, resolve_method, resolve_method, record_override);
        pairs!(
            raw.static_constructor_dependencies,
            resolve_type,
            resolve_method,
            record_static_constructor
        );
        pairs!(
            raw.field_access_dependencies,
            resolve_method,
            resolve_method,
            record_field_access
        );
        pairs!(raw.type_dependencies, resolve_method, resolve_type, record_type_reference);
        pairs!(
            raw.resolved_reflection_calls,
            resolve_method,
            resolve_method,
            record_resolved_reflection_call
        );

        if let Some(entries) = raw.entry_methods {
            rec.facts.entry_methods.get_or_insert_with(IndexSet::new);
            for key in entries {
                if let Some(m) = rec.resolve_method(&key, &mut unresolved) {
                    rec.record_entry(m);
                }
            }
        }
        for key in raw.unanalyzed_methods {
            if let Some(m) = rec.resolve_method(&key, &mut unresolved) {
                rec.record_unanalyzed(m);
            }
        }

        if skipped > 0 {
            debug!(skipped, "Skipped fact tuples with a missing endpoint");
        }
        if unresolved > 0 {
            warn!(unresolved, "Fact tuples referenced undescribed methods or types");
        }

        rec
    }

    /// Parse a JSON fact document.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFacts = serde_json::from_str(json)?;
        Ok(Self::from_raw(raw))
    }

    /// Load a JSON fact file.
    pub fn load(path: &Path) -> TrimtraceResult<Self> {
        let content = fs::read_to_string(path).with_path(path)?;
        Self::from_json_str(&content).map_err(|e| TrimtraceError::facts(path, e.to_string()))
    }

    fn resolve_method(&mut self, key: &str, unresolved: &mut usize) -> Option<MethodId> {
        if key.is_empty() {
            return None;
        }
        if let Some(id) = self.program.method_id(key) {
            return Some(id);
        }
        *unresolved += 1;
        debug!(key, "Interning unresolved method");
        Some(self.program.ensure_method(key))
    }

    fn resolve_type(&mut self, name: &str, unresolved: &mut usize) -> Option<TypeId> {
        if name.is_empty() {
            return None;
        }
        if let Some(id) = self.program.type_id(name) {
            return Some(id);
        }
        *unresolved += 1;
        debug!(name, "Interning unresolved type");
        Some(self.program.ensure_type(name))
    }
}

/// Serialized method description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMethod {
    /// Defaults to `Declaring.Type::Name()`
    #[serde(default)]
    pub key: Option<String>,
    pub declaring_type: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(flatten)]
    pub flags: MethodFlags,
}

/// Serialized type description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawType {
    pub full_name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub enclosing: Option<String>,
    #[serde(default)]
    pub is_interface: bool,
    #[serde(default)]
    pub is_public: bool,
}

/// The JSON fact file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFacts {
    pub methods: Vec<RawMethod>,
    pub types: Vec<RawType>,
    pub direct_calls: Vec<(String, String)>,
    pub virtual_calls: Vec<(String, String)>,
    pub overrides: Vec<(String, String)>,
    pub static_constructor_dependencies: Vec<(String, String)>,
    pub field_access_dependencies: Vec<(String, String)>,
    pub type_dependencies: Vec<(String, String)>,
    pub entry_methods: Option<Vec<String>>,
    pub unanalyzed_methods: Vec<String>,
    pub resolved_reflection_calls: Vec<(String, String)>,
}
