//! Program metadata: methods, types, and the node handles the graph uses.
//!
//! Methods and types are interned once into dense tables. Graph code only
//! ever holds `MethodId` / `TypeId` handles (wrapped in [`Node`]), which are
//! `Copy` and hash cheaply. Anything referenced by a fact but never described
//! is interned as an *unresolved* placeholder so the report can still render
//! a frame for it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Dense handle for a method in a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub u32);

/// Dense handle for a type in a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl MethodId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Method,
    Type,
}

/// A program element tracked by the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Method(MethodId),
    Type(TypeId),
}

impl Node {
    pub fn kind(self) -> NodeKind {
        match self {
            Node::Method(_) => NodeKind::Method,
            Node::Type(_) => NodeKind::Type,
        }
    }

    pub fn as_method(self) -> Option<MethodId> {
        match self {
            Node::Method(m) => Some(m),
            Node::Type(_) => None,
        }
    }

    pub fn as_type(self) -> Option<TypeId> {
        match self {
            Node::Type(t) => Some(t),
            Node::Method(_) => None,
        }
    }
}

impl From<MethodId> for Node {
    fn from(m: MethodId) -> Self {
        Node::Method(m)
    }
}

impl From<TypeId> for Node {
    fn from(t: TypeId) -> Self {
        Node::Type(t)
    }
}

/// Analyzer-visible method attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodFlags {
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_static: bool,
    pub is_constructor: bool,
    pub is_public: bool,
}

/// A method parameter as it appears in a rendered signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub name: String,
}

/// Metadata for one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// Unique key used by fact files to refer to this method
    pub key: String,
    /// Full name of the declaring type
    pub declaring_type: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: String,
    pub flags: MethodFlags,
    /// False for placeholders created from dangling references
    pub resolved: bool,
}

impl MethodDef {
    /// Create a method with no parameters returning `System.Void`.
    ///
    /// The key defaults to `Declaring.Type::Name()`.
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        let declaring_type = declaring_type.into();
        let name = name.into();
        Self {
            key: format!("{}::{}()", declaring_type, name),
            declaring_type,
            name,
            parameters: Vec::new(),
            return_type: "System.Void".to_string(),
            flags: MethodFlags::default(),
            resolved: true,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_parameter(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.parameters.push(Parameter {
            type_name: type_name.into(),
            name: name.into(),
        });
        self
    }

    pub fn returning(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn virtual_(mut self) -> Self {
        self.flags.is_virtual = true;
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.flags.is_virtual = true;
        self.flags.is_abstract = true;
        self
    }

    pub fn static_(mut self) -> Self {
        self.flags.is_static = true;
        self
    }

    pub fn public(mut self) -> Self {
        self.flags.is_public = true;
        self
    }

    /// Mark as an instance constructor (`.ctor`).
    pub fn constructor(mut self) -> Self {
        self.flags.is_constructor = true;
        self
    }

    pub fn is_static_constructor(&self) -> bool {
        self.flags.is_constructor && self.flags.is_static
    }

    pub fn is_instance_constructor(&self) -> bool {
        self.flags.is_constructor && !self.flags.is_static
    }

    /// Human-readable signature: `Declaring.Type::Name(T a, U b) -> Ret`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                if p.name.is_empty() {
                    p.type_name.clone()
                } else {
                    format!("{} {}", p.type_name, p.name)
                }
            })
            .collect();
        format!(
            "{}::{}({}) -> {}",
            self.declaring_type,
            self.name,
            params.join(", "),
            self.return_type
        )
    }
}

/// Metadata for one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub full_name: String,
    pub namespace: String,
    /// Enclosing type for nested types
    pub enclosing: Option<String>,
    pub is_interface: bool,
    pub is_public: bool,
    pub resolved: bool,
}

impl TypeDef {
    /// Create a type, deriving the namespace from the full name.
    ///
    /// Nested types (`Outer/Inner`) take the namespace of their outermost
    /// type and record `Outer` as the enclosing type.
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let enclosing = full_name.rsplit_once('/').map(|(outer, _)| outer.to_string());
        let outermost = full_name.split('/').next().unwrap_or(&full_name);
        let namespace = outermost
            .rsplit_once('.')
            .map(|(ns, _)| ns.to_string())
            .unwrap_or_default();
        Self {
            full_name,
            namespace,
            enclosing,
            is_interface: false,
            is_public: false,
            resolved: true,
        }
    }

    pub fn interface(mut self) -> Self {
        self.is_interface = true;
        self
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }
}

/// Interned method and type tables.
#[derive(Debug, Clone, Default)]
pub struct Program {
    methods: Vec<MethodDef>,
    method_keys: HashMap<String, MethodId>,
    types: Vec<TypeDef>,
    type_keys: HashMap<String, TypeId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a method, returning its handle.
    ///
    /// A resolved definition replaces an earlier placeholder with the same
    /// key; otherwise the first definition wins.
    pub fn add_method(&mut self, def: MethodDef) -> MethodId {
        if !def.declaring_type.is_empty() {
            self.ensure_type(&def.declaring_type);
        }
        if let Some(&id) = self.method_keys.get(&def.key) {
            if !self.methods[id.index()].resolved && def.resolved {
                self.methods[id.index()] = def;
            }
            return id;
        }
        let id = MethodId(self.methods.len() as u32);
        self.method_keys.insert(def.key.clone(), id);
        self.methods.push(def);
        id
    }

    /// Intern a type, returning its handle. Same replacement rule as methods.
    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        if let Some(&id) = self.type_keys.get(&def.full_name) {
            if !self.types[id.index()].resolved && def.resolved {
                self.types[id.index()] = def;
            }
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.type_keys.insert(def.full_name.clone(), id);
        self.types.push(def);
        id
    }

    /// Look up a type by name, interning an unresolved placeholder if unknown.
    pub fn ensure_type(&mut self, full_name: &str) -> TypeId {
        if let Some(&id) = self.type_keys.get(full_name) {
            return id;
        }
        let mut def = TypeDef::new(full_name);
        def.resolved = false;
        self.add_type(def)
    }

    /// Look up a method by key, interning an unresolved placeholder if unknown.
    ///
    /// The declaring type is recovered from a `Type::Member` shaped key when
    /// possible.
    pub fn ensure_method(&mut self, key: &str) -> MethodId {
        if let Some(&id) = self.method_keys.get(key) {
            return id;
        }
        let (declaring_type, name) = match key.split_once("::") {
            Some((ty, rest)) => (
                ty.rsplit(' ').next().unwrap_or(ty).to_string(),
                rest.split('(').next().unwrap_or(rest).to_string(),
            ),
            None => (String::new(), key.to_string()),
        };
        let mut def = MethodDef::new(declaring_type, name).with_key(key);
        def.return_type = String::new();
        def.resolved = false;
        self.add_method(def)
    }

    pub fn method_id(&self, key: &str) -> Option<MethodId> {
        self.method_keys.get(key).copied()
    }

    pub fn type_id(&self, full_name: &str) -> Option<TypeId> {
        self.type_keys.get(full_name).copied()
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.index()]
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn type_named(&self, full_name: &str) -> Option<&TypeDef> {
        self.type_id(full_name).map(|id| self.type_def(id))
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodDef)> {
        self.methods
            .iter()
            .enumerate()
            .map(|(i, m)| (MethodId(i as u32), m))
    }

    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId(i as u32), t))
    }

    /// The declaring type of a method, if it was ever described.
    pub fn declaring_type(&self, id: MethodId) -> Option<&TypeDef> {
        self.type_named(&self.method(id).declaring_type)
    }

    /// True when the method is declared on an interface.
    pub fn is_interface_method(&self, id: MethodId) -> bool {
        self.declaring_type(id).is_some_and(|t| t.is_interface)
    }

    /// Instance constructors grouped by declaring type name.
    pub fn constructor_index(&self) -> HashMap<&str, Vec<MethodId>> {
        let mut index: HashMap<&str, Vec<MethodId>> = HashMap::new();
        for (id, m) in self.methods() {
            if m.is_instance_constructor() {
                index.entry(m.declaring_type.as_str()).or_default().push(id);
            }
        }
        index
    }

    /// Walk enclosing types up to the outermost one.
    pub fn outermost_type<'a>(&'a self, full_name: &'a str) -> &'a str {
        let mut current = full_name;
        // Bounded by the number of types to stay safe on malformed cycles.
        for _ in 0..=self.types.len() {
            match self.type_named(current).and_then(|t| t.enclosing.as_deref()) {
                Some(outer) => current = outer,
                None => break,
            }
        }
        current
    }

    /// Namespace of the outermost type enclosing `full_name`, if non-empty.
    pub fn outermost_namespace(&self, full_name: &str) -> Option<&str> {
        let outer = self.outermost_type(full_name);
        let ns = match self.type_named(outer) {
            Some(t) => t.namespace.as_str(),
            None => return None,
        };
        (!ns.is_empty()).then_some(ns)
    }

    /// Display string for a node: method signature, type name, or a
    /// placeholder when the metadata never resolved.
    pub fn display(&self, node: Node) -> String {
        match node {
            Node::Method(m) => {
                let def = self.method(m);
                if def.resolved {
                    def.signature()
                } else {
                    format!("(???) {}", def.key)
                }
            }
            Node::Type(t) => {
                let def = self.type_def(t);
                if def.resolved {
                    def.full_name.clone()
                } else {
                    format!("(???) {}", def.full_name)
                }
            }
        }
    }
}

impl fmt::Display for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}
