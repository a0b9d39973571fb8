//! Conflict report types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diff::EditOperation;
use crate::graph::{Field, ModId, NodeId};

// ---------------------------------------------------------------------------
// Targets & classifications
// ---------------------------------------------------------------------------

/// The part of the graph a group of operations competes for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Target {
    /// Existence of a node.
    Node { id: NodeId },
    /// One field of a node.
    Field { id: NodeId, field: Field },
    /// The outgoing edge list of a node.
    Edges { source: NodeId },
    /// The root list.
    Roots,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node { id } => write!(f, "node {}", id),
            Self::Field { id, field } => write!(f, "{}.{}", id, field),
            Self::Edges { source } => write!(f, "edges of {}", source),
            Self::Roots => write!(f, "roots"),
        }
    }
}

/// Kind of overlap between two or more mods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Additions that can all be applied.
    CompatibleAdd,
    /// Different values written to the same field or new node.
    NodeValueConflict,
    /// Different resulting edge (or root) lists for the same source.
    EdgeSetConflict,
    /// A deletion competing with edits that depend on the deleted node.
    StructuralConflict,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompatibleAdd => write!(f, "compatible_add"),
            Self::NodeValueConflict => write!(f, "node_value"),
            Self::EdgeSetConflict => write!(f, "edge_set"),
            Self::StructuralConflict => write!(f, "structural"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Where an edge into a deleted node ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub source: NodeId,
    /// New target, or `None` when the edge was dropped.
    pub to: Option<NodeId>,
}

/// The resolution applied to a conflict record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    /// The highest-priority participant's version was kept.
    HigherPriorityWins { winner: ModId },
    /// Every participating operation was applied.
    AllApplied,
    /// The node was deleted and edges still pointing at it were redirected.
    DeletionApplied {
        remover: ModId,
        #[serde(default)]
        redirects: Vec<Redirect>,
    },
    /// The deletion was dropped in favour of a higher-priority dependent.
    DeletionSuppressed {
        kept_by: ModId,
        /// Baseline ancestor the kept node was linked under after the
        /// deleting mods removed every path to it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reattached_to: Option<NodeId>,
    },
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HigherPriorityWins { winner } => write!(f, "{} wins", winner),
            Self::AllApplied => write!(f, "all applied"),
            Self::DeletionApplied { remover, redirects } => {
                write!(f, "deleted by {}", remover)?;
                if !redirects.is_empty() {
                    write!(f, ", {} edge(s) redirected", redirects.len())?;
                }
                Ok(())
            }
            Self::DeletionSuppressed {
                kept_by,
                reattached_to,
            } => {
                write!(f, "kept for {}", kept_by)?;
                if let Some(parent) = reattached_to {
                    write!(f, ", reattached under {}", parent)?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An edit operation together with the mod that contributed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedOp {
    pub mod_id: ModId,
    pub priority: u32,
    pub op: EditOperation,
}

/// One detected overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub target: Target,
    pub classification: Classification,
    /// Competing operations, highest priority first.
    pub operations: Vec<AttributedOp>,
    pub resolution: Resolution,
}

impl ConflictRecord {
    /// Distinct mods taking part, highest priority first.
    pub fn mods(&self) -> Vec<&ModId> {
        let mut mods: Vec<&ModId> = Vec::new();
        for op in &self.operations {
            if !mods.contains(&&op.mod_id) {
                mods.push(&op.mod_id);
            }
        }
        mods
    }
}

/// All overlaps found in one merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Conflicts, sorted by target.
    pub records: Vec<ConflictRecord>,
    /// Overlapping additions that were all applied.
    pub compatible: Vec<ConflictRecord>,
    /// Nodes of the merged graph no root reaches.
    pub orphans: Vec<NodeId>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.compatible.is_empty()
    }

    pub fn find(&self, target: &Target) -> Option<&ConflictRecord> {
        self.records.iter().find(|r| &r.target == target)
    }

    pub fn count_by(&self, classification: Classification) -> usize {
        self.records
            .iter()
            .filter(|r| r.classification == classification)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_sort_by_kind_then_id() {
        let mut targets = vec![
            Target::Roots,
            Target::Edges { source: "a".into() },
            Target::Field {
                id: "a".into(),
                field: Field::Text,
            },
            Target::Node { id: "b".into() },
            Target::Node { id: "a".into() },
        ];
        targets.sort();
        assert_eq!(targets[0], Target::Node { id: "a".into() });
        assert_eq!(targets[4], Target::Roots);
    }

    #[test]
    fn test_record_mods_are_distinct() {
        let op = EditOperation::RootAdded { id: "x".into() };
        let record = ConflictRecord {
            target: Target::Roots,
            classification: Classification::EdgeSetConflict,
            operations: vec![
                AttributedOp {
                    mod_id: ModId::new("b"),
                    priority: 2,
                    op: op.clone(),
                },
                AttributedOp {
                    mod_id: ModId::new("b"),
                    priority: 2,
                    op: EditOperation::RootRemoved { id: "y".into() },
                },
                AttributedOp {
                    mod_id: ModId::new("a"),
                    priority: 1,
                    op,
                },
            ],
            resolution: Resolution::HigherPriorityWins {
                winner: ModId::new("b"),
            },
        };
        assert_eq!(record.mods(), vec![&ModId::new("b"), &ModId::new("a")]);
        assert_eq!(record.resolution.to_string(), "b wins");
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = ConflictReport {
            orphans: vec!["n".into()],
            ..ConflictReport::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["orphans"][0], "n");
        assert!(report.is_clean());
    }
}
