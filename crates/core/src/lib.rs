//! dlgmerge core library.
//!
//! This crate provides the components for merging independently modded
//! copies of a dialogue resource: the typed graph model, the resource
//! builder and serializer, the diff engine, conflict detection, the
//! priority-ordered merge engine, and the session pipeline that ties them
//! together.

pub mod config;
pub mod conflict;
pub mod diff;
pub mod errors;
pub mod graph;
pub mod merge;
pub mod resource;
pub mod session;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{ConflictDetector, ConflictReport};
pub use diff::{DiffEngine, EditOperation, ModContribution};
pub use graph::{Graph, ModId, NodeId};
pub use merge::{CancelFlag, MergeEngine, MergeOutcome};
pub use resource::{serialize, DialogResource, GraphBuilder};
pub use session::{MergeSession, ModInput, ResourceSource, SessionOutcome};
