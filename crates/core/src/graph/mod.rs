//! Typed in-memory dialogue graph.

pub mod ids;
pub mod model;
pub mod node;

pub use ids::{ModId, NodeId};
pub use model::{Edge, Graph};
pub use node::{ActionStep, DialogLine, Field, FieldValue, Flag, Node, NodeKind, Payload, TransitionStep};
