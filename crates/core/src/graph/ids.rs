//! Identifiers for dialogue nodes and contributing mods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a dialogue node.
///
/// `External` ids are the stable UUID strings carried by the resource.
/// `Local` ids are handed out by the builder to nodes that arrived without an
/// external identity; `scope` separates resources so anonymous nodes from two
/// different mods never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum NodeId {
    External(String),
    Local { scope: u32, index: u32 },
}

impl NodeId {
    /// Create an external id.
    pub fn external(id: impl Into<String>) -> Self {
        Self::External(id.into())
    }

    /// Create a local id.
    pub fn local(scope: u32, index: u32) -> Self {
        Self::Local { scope, index }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    /// The external id string, if this node has one.
    pub fn as_external(&self) -> Option<&str> {
        match self {
            Self::External(id) => Some(id),
            Self::Local { .. } => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External(id) => write!(f, "{}", id),
            Self::Local { scope, index } => write!(f, "#{}.{}", scope, index),
        }
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('#') else {
            if s.is_empty() {
                return Err("empty node id".to_string());
            }
            return Ok(Self::External(s.to_string()));
        };
        let (scope, index) = rest
            .split_once('.')
            .ok_or_else(|| format!("local node id '{}' must have the form #scope.index", s))?;
        let scope = scope
            .parse()
            .map_err(|_| format!("invalid scope in local node id '{}'", s))?;
        let index = index
            .parse()
            .map_err(|_| format!("invalid index in local node id '{}'", s))?;
        Ok(Self::Local { scope, index })
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::External(id.to_string())
    }
}

/// Identifier of a contributing mod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModId(String);

impl ModId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_parse() {
        let ext = NodeId::external("0a1b");
        assert_eq!(ext.to_string(), "0a1b");
        assert_eq!("0a1b".parse::<NodeId>().unwrap(), ext);

        let local = NodeId::local(2, 7);
        assert_eq!(local.to_string(), "#2.7");
        assert_eq!("#2.7".parse::<NodeId>().unwrap(), local);
        assert!(local.is_local());
        assert_eq!(local.as_external(), None);
    }

    #[test]
    fn test_node_id_parse_errors() {
        assert!("".parse::<NodeId>().is_err());
        assert!("#7".parse::<NodeId>().is_err());
        assert!("#a.b".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_serde_as_string() {
        let json = serde_json::to_string(&NodeId::local(0, 3)).unwrap();
        assert_eq!(json, "\"#0.3\"");
        let back: NodeId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, NodeId::external("abc"));
    }

    #[test]
    fn test_external_sorts_before_local() {
        let mut ids = vec![NodeId::local(0, 0), NodeId::external("z"), NodeId::external("a")];
        ids.sort();
        assert_eq!(ids[0], NodeId::external("a"));
        assert!(ids[2].is_local());
    }
}
