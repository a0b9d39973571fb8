//! Edit scripts between a baseline graph and a modified copy.
//!
//! Nodes correspond by id. The output order is canonical: node additions,
//! field changes, per-source edge operations (sources in id order), root
//! operations, node removals.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{Edge, Field, FieldValue, Graph, ModId, Node, NodeId};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One primitive edit relative to the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    NodeAdded {
        node: Node,
    },
    NodeRemoved {
        id: NodeId,
    },
    NodeFieldChanged {
        id: NodeId,
        field: Field,
        old: FieldValue,
        new: FieldValue,
    },
    EdgeAdded {
        edge: Edge,
    },
    EdgeRemoved {
        source: NodeId,
        target: NodeId,
    },
    EdgeGuardChanged {
        source: NodeId,
        target: NodeId,
        old: Option<String>,
        new: Option<String>,
    },
    /// Full target order of `source` in the modified graph.
    EdgeReordered {
        source: NodeId,
        order: Vec<NodeId>,
    },
    RootAdded {
        id: NodeId,
    },
    RootRemoved {
        id: NodeId,
    },
    RootsReordered {
        order: Vec<NodeId>,
    },
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeAdded { node } => write!(f, "+ node {} ({})", node.id, node.kind()),
            Self::NodeRemoved { id } => write!(f, "- node {}", id),
            Self::NodeFieldChanged { id, field, old, new } => write!(
                f,
                "~ {}.{}: {} -> {}",
                id,
                field,
                old.summary(),
                new.summary()
            ),
            Self::EdgeAdded { edge } => match &edge.guard {
                Some(guard) => write!(f, "+ edge {} -> {} [{}]", edge.source, edge.target, guard),
                None => write!(f, "+ edge {} -> {}", edge.source, edge.target),
            },
            Self::EdgeRemoved { source, target } => write!(f, "- edge {} -> {}", source, target),
            Self::EdgeGuardChanged {
                source,
                target,
                old,
                new,
            } => write!(
                f,
                "~ edge {} -> {} guard: {} -> {}",
                source,
                target,
                old.as_deref().unwrap_or("<none>"),
                new.as_deref().unwrap_or("<none>")
            ),
            Self::EdgeReordered { source, order } => {
                write!(f, "~ edges of {} reordered: [{}]", source, join(order))
            }
            Self::RootAdded { id } => write!(f, "+ root {}", id),
            Self::RootRemoved { id } => write!(f, "- root {}", id),
            Self::RootsReordered { order } => write!(f, "~ roots reordered: [{}]", join(order)),
        }
    }
}

fn join(ids: &[NodeId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One mod's edits against the shared baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModContribution {
    pub mod_id: ModId,
    /// Higher wins. Ranks must be unique across a merge.
    pub priority: u32,
    pub edits: Vec<EditOperation>,
}

impl ModContribution {
    pub fn new(mod_id: impl Into<ModId>, priority: u32, edits: Vec<EditOperation>) -> Self {
        Self {
            mod_id: mod_id.into(),
            priority,
            edits,
        }
    }

    /// Diff `modified` against `base` and wrap the result.
    pub fn from_graphs(mod_id: impl Into<ModId>, priority: u32, base: &Graph, modified: &Graph) -> Self {
        Self::new(mod_id, priority, DiffEngine::diff(base, modified))
    }
}

// ---------------------------------------------------------------------------
// Sequence diff
// ---------------------------------------------------------------------------

/// Membership and order changes between two duplicate-free sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SequenceDiff<T> {
    pub removed: Vec<T>,
    pub added: Vec<T>,
    /// The full modified order, when it differs from "base minus removed,
    /// then added in modified order".
    pub reordered: Option<Vec<T>>,
}

pub(crate) fn sequence_diff<T: PartialEq + Clone>(base: &[T], modified: &[T]) -> SequenceDiff<T> {
    let removed: Vec<T> = base
        .iter()
        .filter(|item| !modified.contains(item))
        .cloned()
        .collect();
    let added: Vec<T> = modified
        .iter()
        .filter(|item| !base.contains(item))
        .cloned()
        .collect();

    let expected: Vec<&T> = base
        .iter()
        .filter(|item| !removed.contains(item))
        .chain(added.iter())
        .collect();
    let actual: Vec<&T> = modified.iter().collect();
    let reordered = (expected != actual).then(|| modified.to_vec());

    SequenceDiff {
        removed,
        added,
        reordered,
    }
}

/// Permute the entries of `items` named in `order` into that order. Entries
/// not named keep their slot.
pub(crate) fn apply_order<T: Clone>(items: &mut [T], order: &[NodeId], key: impl Fn(&T) -> &NodeId) {
    let slots: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| order.contains(key(item)))
        .map(|(i, _)| i)
        .collect();
    let picked: Vec<T> = order
        .iter()
        .filter_map(|id| items.iter().find(|item| key(item) == id).cloned())
        .collect();
    for (slot, item) in slots.into_iter().zip(picked) {
        items[slot] = item;
    }
}

// ---------------------------------------------------------------------------
// Diff engine
// ---------------------------------------------------------------------------

/// Stateless edit-script computation.
pub struct DiffEngine;

impl DiffEngine {
    /// Compute the canonical edit script turning `base` into `modified`.
    pub fn diff(base: &Graph, modified: &Graph) -> Vec<EditOperation> {
        let mut ops = Vec::new();

        for node in modified.nodes() {
            if !base.contains(&node.id) {
                ops.push(EditOperation::NodeAdded { node: node.clone() });
            }
        }

        for id in base.node_ids() {
            if let (Some(old), Some(new)) = (base.node(id), modified.node(id)) {
                diff_fields(old, new, &mut ops);
            }
        }

        let mut sources: Vec<&NodeId> = base
            .edge_sources()
            .chain(modified.edge_sources())
            .filter(|s| modified.contains(s))
            .collect();
        sources.sort();
        sources.dedup();
        for source in sources {
            diff_edges(source, base.edges_from(source), modified.edges_from(source), &mut ops);
        }

        let roots = sequence_diff(base.roots(), modified.roots());
        ops.extend(roots.removed.into_iter().map(|id| EditOperation::RootRemoved { id }));
        ops.extend(roots.added.into_iter().map(|id| EditOperation::RootAdded { id }));
        if let Some(order) = roots.reordered {
            ops.push(EditOperation::RootsReordered { order });
        }

        for id in base.node_ids() {
            if !modified.contains(id) {
                ops.push(EditOperation::NodeRemoved { id: id.clone() });
            }
        }

        debug!(
            resource = %base.resource_id(),
            edits = ops.len(),
            "computed edit script"
        );
        ops
    }
}

fn diff_fields(old: &Node, new: &Node, ops: &mut Vec<EditOperation>) {
    if old.kind() != new.kind() {
        ops.push(EditOperation::NodeFieldChanged {
            id: old.id.clone(),
            field: Field::Kind,
            old: FieldValue::Payload(Box::new(old.payload.clone())),
            new: FieldValue::Payload(Box::new(new.payload.clone())),
        });
    } else {
        for ((field, before), (_, after)) in old.payload.fields().into_iter().zip(new.payload.fields()) {
            if before != after {
                ops.push(EditOperation::NodeFieldChanged {
                    id: old.id.clone(),
                    field,
                    old: before,
                    new: after,
                });
            }
        }
    }

    let mut keys: Vec<&String> = old.opaque.keys().chain(new.opaque.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let field = Field::Opaque(key.clone());
        let before = old.field(&field).unwrap_or(FieldValue::Absent);
        let after = new.field(&field).unwrap_or(FieldValue::Absent);
        if before != after {
            ops.push(EditOperation::NodeFieldChanged {
                id: old.id.clone(),
                field,
                old: before,
                new: after,
            });
        }
    }
}

fn diff_edges(source: &NodeId, base: &[Edge], modified: &[Edge], ops: &mut Vec<EditOperation>) {
    let base_targets: Vec<NodeId> = base.iter().map(|e| e.target.clone()).collect();
    let modified_targets: Vec<NodeId> = modified.iter().map(|e| e.target.clone()).collect();
    let seq = sequence_diff(&base_targets, &modified_targets);

    for target in seq.removed {
        ops.push(EditOperation::EdgeRemoved {
            source: source.clone(),
            target,
        });
    }
    for target in &seq.added {
        if let Some(edge) = modified.iter().find(|e| &e.target == target) {
            ops.push(EditOperation::EdgeAdded { edge: edge.clone() });
        }
    }
    for edge in modified {
        if let Some(before) = base.iter().find(|e| e.target == edge.target) {
            if before.guard != edge.guard {
                ops.push(EditOperation::EdgeGuardChanged {
                    source: source.clone(),
                    target: edge.target.clone(),
                    old: before.guard.clone(),
                    new: edge.guard.clone(),
                });
            }
        }
    }
    if let Some(order) = seq.reordered {
        ops.push(EditOperation::EdgeReordered {
            source: source.clone(),
            order,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, Payload};
    use serde_json::json;

    fn base() -> Graph {
        let mut g = Graph::new("dlg");
        for id in ["r", "a", "b", "c"] {
            g.insert_node(Node::new(id, Payload::answer(format!("h-{}", id))));
        }
        g.add_root("r".into());
        g.add_edge(Edge::new("r", "a"));
        g.add_edge(Edge::new("r", "b"));
        g.add_edge(Edge::new("r", "c"));
        g
    }

    #[test]
    fn test_identical_graphs_produce_no_edits() {
        assert!(DiffEngine::diff(&base(), &base()).is_empty());
    }

    #[test]
    fn test_order_only_change_is_single_reorder() {
        let b = base();
        let mut m = base();
        m.edges_mut(&"r".into()).unwrap().swap(0, 2);

        let ops = DiffEngine::diff(&b, &m);
        assert_eq!(
            ops,
            vec![EditOperation::EdgeReordered {
                source: "r".into(),
                order: vec!["c".into(), "b".into(), "a".into()],
            }]
        );
    }

    #[test]
    fn test_appended_edge_needs_no_reorder() {
        let b = base();
        let mut m = base();
        m.insert_node(Node::new("d", Payload::question("h-d")));
        m.add_edge(Edge::new("r", "d").with_guard("g"));

        let ops = DiffEngine::diff(&b, &m);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], EditOperation::NodeAdded { node } if node.id == NodeId::from("d")));
        assert!(matches!(&ops[1], EditOperation::EdgeAdded { edge } if edge.guard.as_deref() == Some("g")));
    }

    #[test]
    fn test_field_changes_per_field() {
        let b = base();
        let mut m = base();
        let node = m.node_mut(&"a".into()).unwrap();
        node.set_field(&Field::Text, FieldValue::Ref("new".into())).unwrap();
        node.set_field(&Field::Opaque("Approval".into()), FieldValue::Opaque(json!(3)))
            .unwrap();

        let ops = DiffEngine::diff(&b, &m);
        let fields: Vec<String> = ops
            .iter()
            .map(|op| match op {
                EditOperation::NodeFieldChanged { field, .. } => field.to_string(),
                other => panic!("unexpected op {}", other),
            })
            .collect();
        assert_eq!(fields, vec!["text", "opaque:Approval"]);
    }

    #[test]
    fn test_kind_change_is_single_op() {
        let b = base();
        let mut m = base();
        m.node_mut(&"b".into()).unwrap().payload = Payload::action("script");

        let ops = DiffEngine::diff(&b, &m);
        assert_eq!(ops.len(), 1);
        let EditOperation::NodeFieldChanged { field, new, .. } = &ops[0] else {
            panic!("expected a field change");
        };
        assert_eq!(*field, Field::Kind);
        assert!(matches!(new, FieldValue::Payload(p) if p.kind() == NodeKind::AutomatedAction));
    }

    #[test]
    fn test_removal_orders_edges_before_node() {
        let b = base();
        let mut m = base();
        m.remove_node(&"b".into());

        let ops = DiffEngine::diff(&b, &m);
        assert_eq!(
            ops,
            vec![
                EditOperation::EdgeRemoved {
                    source: "r".into(),
                    target: "b".into()
                },
                EditOperation::NodeRemoved { id: "b".into() },
            ]
        );
    }

    #[test]
    fn test_guard_change_and_roots() {
        let b = base();
        let mut m = base();
        m.edges_mut(&"r".into()).unwrap()[1].guard = Some("cond".into());
        m.add_root("c".into());

        let ops = DiffEngine::diff(&b, &m);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], EditOperation::EdgeGuardChanged { new: Some(g), .. } if g == "cond"));
        assert_eq!(ops[1], EditOperation::RootAdded { id: "c".into() });
    }

    #[test]
    fn test_sequence_diff_detects_reorder_with_additions() {
        let seq = sequence_diff(&[1, 2, 3], &[4, 2, 1]);
        assert_eq!(seq.removed, vec![3]);
        assert_eq!(seq.added, vec![4]);
        assert_eq!(seq.reordered, Some(vec![4, 2, 1]));

        let seq = sequence_diff(&[1, 2, 3], &[1, 3, 5]);
        assert_eq!(seq.reordered, None);
    }

    #[test]
    fn test_apply_order_keeps_unnamed_slots() {
        let mut items: Vec<NodeId> = ["a", "x", "b", "c"].iter().map(|s| NodeId::from(*s)).collect();
        let order: Vec<NodeId> = ["c", "a", "b"].iter().map(|s| NodeId::from(*s)).collect();
        apply_order(&mut items, &order, |id| id);
        let names: Vec<String> = items.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["c", "x", "a", "b"]);
    }

    #[test]
    fn test_display_is_readable() {
        let op = EditOperation::EdgeAdded {
            edge: Edge::new("a", "b").with_guard("g"),
        };
        assert_eq!(op.to_string(), "+ edge a -> b [g]");
    }
}
