//! Data model shared by every stage of the engine.
//!
//! - [`program`]: interned method/type metadata and the [`Node`] handle
//! - [`edge`]: dependency kinds and kind-tagged edges

pub mod edge;
pub mod program;

pub use edge::{Edge, EdgeKind};
pub use program::{
    MethodDef, MethodFlags, MethodId, Node, NodeKind, Parameter, Program, TypeDef, TypeId,
};
