//! Dependency edge kinds.

use serde::Serialize;
use std::fmt;

use super::program::Node;

/// Kind of a dependency between two nodes.
///
/// Override relationships are consumed while resolving virtual calls and
/// never stored as edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Ordinary call
    DirectCall,
    /// Dispatch instruction to a non-virtual target (behaves like a call)
    VirtualCallToNonVirtual,
    /// Dispatch resolved to one concrete override
    VirtualCallToVirtual,
    /// Synthetic: constructing the type makes the method reachable
    ConstructorDependency,
    /// `(type, static constructor)`
    StaticConstructorDependency,
    /// `(accessing method, static constructor)`
    StaticFieldAccessDependency,
    /// `(method, type)`
    TypeDependency,
}

impl EdgeKind {
    /// True for the kinds produced by a call instruction.
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Self::DirectCall | Self::VirtualCallToNonVirtual | Self::VirtualCallToVirtual
        )
    }

    /// True for calls that are not subject to dispatch.
    pub fn is_direct_call(self) -> bool {
        matches!(self, Self::DirectCall | Self::VirtualCallToNonVirtual)
    }

    /// Label shown between two frames of a call chain, if any.
    pub fn hop_label(self) -> Option<&'static str> {
        match self {
            Self::DirectCall | Self::VirtualCallToNonVirtual => None,
            Self::VirtualCallToVirtual => Some("virtual call"),
            Self::ConstructorDependency => Some("constructor dependency"),
            Self::StaticConstructorDependency => Some("static constructor kept for type"),
            Self::StaticFieldAccessDependency => Some("static field access"),
            Self::TypeDependency => Some("type reference"),
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectCall => write!(f, "direct call"),
            Self::VirtualCallToNonVirtual => write!(f, "virtual call to non-virtual"),
            Self::VirtualCallToVirtual => write!(f, "virtual call"),
            Self::ConstructorDependency => write!(f, "constructor dependency"),
            Self::StaticConstructorDependency => write!(f, "static constructor dependency"),
            Self::StaticFieldAccessDependency => write!(f, "static field access"),
            Self::TypeDependency => write!(f, "type dependency"),
        }
    }
}

/// A directed, kind-tagged dependency `(from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: Node,
    pub to: Node,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(from: impl Into<Node>, to: impl Into<Node>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
        }
    }

    /// True if either endpoint is `node`.
    #[inline]
    pub fn touches(&self, node: Node) -> bool {
        self.from == node || self.to == node
    }
}
