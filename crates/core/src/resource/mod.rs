//! Boundary between the external resource representation and the graph.

pub mod builder;
pub mod format;
pub mod serializer;

pub use builder::{DialogIndex, GraphBuilder, IndexEntry, StaticIndex};
pub use format::{DialogResource, EdgeRecord, NodeRecord, DIALOG_VARIANT};
pub use serializer::serialize;
