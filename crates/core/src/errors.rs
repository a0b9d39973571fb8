//! Error types for the dlgmerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Cancellation is not an error: an aborted merge is reported as
//! [`crate::merge::MergeOutcome::Aborted`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

/// Errors from graph model operations and integrity checks.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The node kind does not carry the requested field.
    #[error("{kind} node has no field '{field}'")]
    FieldNotApplicable {
        kind: String,
        field: String,
    },

    /// A value of the wrong shape was supplied for a field.
    #[error("invalid value for field '{field}': {detail}")]
    InvalidFieldValue {
        field: String,
        detail: String,
    },

    /// An edge endpoint does not exist in the node table.
    #[error("edge {source_id} -> {target_id} references a missing node")]
    DanglingEdge {
        source_id: String,
        target_id: String,
    },

    /// A root id does not exist in the node table.
    #[error("root '{0}' is not a node of the graph")]
    MissingRoot(String),
}

// ---------------------------------------------------------------------------
// Resource errors
// ---------------------------------------------------------------------------

/// Errors raised at the resource boundary (Builder / Serializer).
///
/// All of these are fatal to including one mod, never to the whole session.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The resource is structurally malformed.
    #[error("malformed dialog resource: {0}")]
    Parse(String),

    /// The resource encodes a dialogue subtype the engine does not model.
    #[error("unsupported dialog resource variant '{0}'")]
    UnsupportedVariant(String),

    /// Two nodes share an id within one resource.
    #[error("duplicate node id '{0}' in dialog resource")]
    DuplicateId(String),

    /// A mod resource describes a different dialog than the baseline.
    #[error("resource {found} does not match baseline resource {expected}")]
    ResourceMismatch {
        expected: String,
        found: String,
    },

    /// JSON encoding/decoding failure.
    #[error("dialog resource JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O wrapper.
    #[error("dialog resource I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors that are fatal to the whole merge.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Two contributions share a priority rank.
    #[error("priority {priority} assigned to both '{first}' and '{second}'")]
    PriorityCycle {
        priority: u32,
        first: String,
        second: String,
    },

    /// The same mod was supplied twice.
    #[error("mod '{0}' contributed more than once")]
    DuplicateContribution(String),

    /// The merge produced (or would produce) an invalid graph.
    #[error("unresolved reference in merged graph: {0}")]
    UnresolvedReference(String),

    /// An edit did not fit the node it was applied to.
    #[error("edit could not be applied: {0}")]
    InvalidEdit(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors that end a merge session before a result is produced.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The baseline resource itself could not be built.
    #[error("baseline resource rejected: {0}")]
    Baseline(#[source] ResourceError),

    /// A per-mod worker task panicked or was cancelled by the runtime.
    #[error("diff task for mod '{mod_id}' failed: {detail}")]
    TaskFailed {
        mod_id: String,
        detail: String,
    },

    /// Merge failure escalated to the caller.
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ResourceError::DuplicateId("abc".into());
        assert_eq!(err.to_string(), "duplicate node id 'abc' in dialog resource");

        let err = MergeError::PriorityCycle {
            priority: 3,
            first: "a".into(),
            second: "b".into(),
        };
        assert_eq!(err.to_string(), "priority 3 assigned to both 'a' and 'b'");

        let err = ConfigError::InvalidValue {
            field: "merge.max_parallel_diffs".into(),
            detail: "must be > 0".into(),
        };
        assert!(err.to_string().contains("max_parallel_diffs"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = ResourceError::UnsupportedVariant("voice_bark".into()).into();
        assert!(matches!(core_err, CoreError::Resource(_)));

        let core_err: CoreError = MergeError::UnresolvedReference("x".into()).into();
        assert!(matches!(core_err, CoreError::Merge(_)));

        let session_err: SessionError = MergeError::DuplicateContribution("m".into()).into();
        assert!(matches!(session_err, SessionError::Merge(_)));
    }
}
