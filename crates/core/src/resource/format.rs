//! JSON encoding of a dialog resource.
//!
//! This is the exchange format consumed by the builder and produced by the
//! serializer. Unknown keys on the resource and on each node are collected
//! into `extra` and written back unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ResourceError;
use crate::graph::Flag;

/// Variant tag for ordinary dialogues, the only variant the engine models.
pub const DIALOG_VARIANT: &str = "dialog";

/// A dialog resource as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogResource {
    pub uuid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    #[serde(default)]
    pub roots: Vec<String>,

    #[serde(default)]
    pub nodes: Vec<NodeRecord>,

    #[serde(default)]
    pub edges: Vec<EdgeRecord>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One entry of the resource's node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable id. Nodes without one are referenced as `#<index>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default)]
    pub check_flags: Vec<Flag>,

    #[serde(default)]
    pub set_flags: Vec<Flag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Mod that supplied the effective version of this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One entry of the resource's edge list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    /// Position among the source's outgoing edges. Defaults to list order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

impl DialogResource {
    /// Parse a resource from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ResourceError> {
        serde_json::from_str(text).map_err(|e| ResourceError::Parse(e.to_string()))
    }

    /// Load a resource from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, ResourceError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self, pretty: bool) -> Result<String, ResourceError> {
        let text = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(text)
    }

    /// Write the resource to `path`, creating parent directories as needed.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<(), ResourceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut text = self.to_json_string(pretty)?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }
}
