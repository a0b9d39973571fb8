//! The in-memory dialogue graph.
//!
//! Nodes are kept in an id-keyed table and edges in a per-source ordered
//! list, so the graph holds no references between nodes and cycles are
//! plain data. A separate `sequence` records the order nodes were emitted
//! in the resource; it carries no merge semantics.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ModId, NodeId};
use super::node::Node;
use crate::errors::GraphError;

/// A directed link from one node to a candidate continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    /// Optional condition/script reference gating the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }
}

/// An in-memory dialogue graph for one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    resource_id: String,
    roots: Vec<NodeId>,
    nodes: BTreeMap<NodeId, Node>,
    sequence: Vec<NodeId>,
    edges: BTreeMap<NodeId, Vec<Edge>>,
    attribution: BTreeMap<NodeId, ModId>,
    extra: BTreeMap<String, Value>,
}

impl Graph {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            ..Self::default()
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    // -- roots --------------------------------------------------------------

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Append a root. Returns `false` if it was already a root.
    pub fn add_root(&mut self, id: NodeId) -> bool {
        if self.roots.contains(&id) {
            return false;
        }
        self.roots.push(id);
        true
    }

    /// Insert a root at `index` (clamped to the list length).
    pub fn insert_root_at(&mut self, index: usize, id: NodeId) -> bool {
        if self.roots.contains(&id) {
            return false;
        }
        let index = index.min(self.roots.len());
        self.roots.insert(index, id);
        true
    }

    pub fn remove_root(&mut self, id: &NodeId) -> bool {
        let before = self.roots.len();
        self.roots.retain(|r| r != id);
        before != self.roots.len()
    }

    pub(crate) fn roots_mut(&mut self) -> &mut Vec<NodeId> {
        &mut self.roots
    }

    // -- nodes --------------------------------------------------------------

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in resource emission order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.sequence.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Node ids in sorted order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Insert or replace a node. New nodes are appended to the emission
    /// sequence; replaced nodes keep their position.
    pub fn insert_node(&mut self, node: Node) -> Option<Node> {
        let id = node.id.clone();
        let previous = self.nodes.insert(id.clone(), node);
        if previous.is_none() {
            self.sequence.push(id);
        }
        previous
    }

    /// Remove a node together with its outgoing and incoming edges, its
    /// root entry and its attribution.
    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        self.sequence.retain(|n| n != id);
        self.roots.retain(|n| n != id);
        self.edges.remove(id);
        for list in self.edges.values_mut() {
            list.retain(|e| &e.target != id);
        }
        self.edges.retain(|_, list| !list.is_empty());
        self.attribution.remove(id);
        Some(node)
    }

    // -- edges --------------------------------------------------------------

    /// Outgoing edges of `source` in rank order.
    pub fn edges_from(&self, source: &NodeId) -> &[Edge] {
        self.edges.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every source with at least one outgoing edge, in id order.
    pub fn edge_sources(&self) -> impl Iterator<Item = &NodeId> {
        self.edges.keys()
    }

    /// Targets of `source` in rank order.
    pub fn children(&self, source: &NodeId) -> Vec<NodeId> {
        self.edges_from(source)
            .iter()
            .map(|e| e.target.clone())
            .collect()
    }

    pub fn edge(&self, source: &NodeId, target: &NodeId) -> Option<&Edge> {
        self.edges_from(source).iter().find(|e| &e.target == target)
    }

    pub fn first_child(&self, id: &NodeId) -> Option<&NodeId> {
        self.edges_from(id).first().map(|e| &e.target)
    }

    /// Append an edge at the end of its source's list. Returns `false` if an
    /// edge with the same endpoints already exists.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        let len = self.edges_from(&edge.source).len();
        self.insert_edge(len, edge)
    }

    /// Insert an edge at rank `index` (clamped to the list length).
    pub fn insert_edge(&mut self, index: usize, edge: Edge) -> bool {
        if self.edge(&edge.source, &edge.target).is_some() {
            return false;
        }
        let list = self.edges.entry(edge.source.clone()).or_default();
        let index = index.min(list.len());
        list.insert(index, edge);
        true
    }

    pub fn remove_edge(&mut self, source: &NodeId, target: &NodeId) -> Option<Edge> {
        let list = self.edges.get_mut(source)?;
        let pos = list.iter().position(|e| &e.target == target)?;
        let edge = list.remove(pos);
        if list.is_empty() {
            self.edges.remove(source);
        }
        Some(edge)
    }

    pub(crate) fn edges_mut(&mut self, source: &NodeId) -> Option<&mut Vec<Edge>> {
        self.edges.get_mut(source)
    }

    /// Drop sources whose outgoing list became empty.
    pub(crate) fn prune_edges(&mut self) {
        self.edges.retain(|_, list| !list.is_empty());
    }

    /// Every edge whose target is `id`, as (source, rank) pairs.
    pub fn incoming(&self, id: &NodeId) -> Vec<(NodeId, usize)> {
        let mut found = Vec::new();
        for (source, list) in &self.edges {
            for (rank, edge) in list.iter().enumerate() {
                if &edge.target == id {
                    found.push((source.clone(), rank));
                }
            }
        }
        found
    }

    // -- attribution & opaque fields ------------------------------------------

    pub fn attribution(&self, id: &NodeId) -> Option<&ModId> {
        self.attribution.get(id)
    }

    pub fn set_attribution(&mut self, id: NodeId, mod_id: ModId) {
        self.attribution.insert(id, mod_id);
    }

    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.extra
    }

    // -- analysis -------------------------------------------------------------

    /// Ids reachable from any root, following edges whose target exists.
    pub fn reachable(&self) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> = self
            .roots
            .iter()
            .filter(|r| self.nodes.contains_key(*r))
            .collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for edge in self.edges_from(id) {
                if self.nodes.contains_key(&edge.target) && !seen.contains(&edge.target) {
                    queue.push_back(&edge.target);
                }
            }
        }
        seen
    }

    /// Nodes not reachable from any root, in id order.
    pub fn orphans(&self) -> Vec<NodeId> {
        let reachable = self.reachable();
        self.nodes
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect()
    }

    /// Verify every root and edge endpoint names an existing node.
    pub fn check_integrity(&self) -> Result<(), GraphError> {
        for root in &self.roots {
            if !self.nodes.contains_key(root) {
                return Err(GraphError::MissingRoot(root.to_string()));
            }
        }
        for (source, list) in &self.edges {
            for edge in list {
                if !self.nodes.contains_key(source) || !self.nodes.contains_key(&edge.target) {
                    return Err(GraphError::DanglingEdge {
                        source_id: source.to_string(),
                        target_id: edge.target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Equality of the graph content, ignoring emission order and
    /// attribution.
    pub fn structurally_eq(&self, other: &Graph) -> bool {
        self.resource_id == other.resource_id
            && self.roots == other.roots
            && self.nodes == other.nodes
            && self.edges == other.edges
            && self.extra == other.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::Payload;

    fn node(id: &str) -> Node {
        Node::new(id, Payload::answer(format!("h-{}", id)))
    }

    fn sample() -> Graph {
        let mut g = Graph::new("dlg");
        for id in ["a", "b", "c", "d"] {
            g.insert_node(node(id));
        }
        g.add_root("a".into());
        g.add_edge(Edge::new("a", "b"));
        g.add_edge(Edge::new("a", "c"));
        g.add_edge(Edge::new("c", "a"));
        g
    }

    #[test]
    fn test_edges_keep_rank_order() {
        let mut g = sample();
        assert_eq!(g.children(&"a".into()), vec![NodeId::from("b"), NodeId::from("c")]);
        assert!(g.insert_edge(0, Edge::new("a", "d")));
        assert_eq!(g.first_child(&"a".into()), Some(&NodeId::from("d")));
        assert!(!g.add_edge(Edge::new("a", "b")), "duplicate edge accepted");
    }

    #[test]
    fn test_remove_node_scrubs_references() {
        let mut g = sample();
        g.set_attribution("c".into(), ModId::new("m"));
        g.remove_node(&"c".into()).unwrap();

        assert!(g.edge(&"a".into(), &"c".into()).is_none());
        assert!(g.edges_from(&"c".into()).is_empty());
        assert!(g.attribution(&"c".into()).is_none());
        assert_eq!(g.nodes().count(), 3);
        g.check_integrity().unwrap();
    }

    #[test]
    fn test_remove_last_edge_prunes_source() {
        let mut g = sample();
        g.remove_edge(&"c".into(), &"a".into()).unwrap();
        assert!(g.edge_sources().all(|s| s != &NodeId::from("c")));
    }

    #[test]
    fn test_reachability_and_orphans() {
        let g = sample();
        let reachable = g.reachable();
        assert!(reachable.contains(&NodeId::from("c")));
        assert_eq!(g.orphans(), vec![NodeId::from("d")]);
    }

    #[test]
    fn test_check_integrity_reports_dangling_edge() {
        let mut g = sample();
        g.edges_mut(&"a".into())
            .unwrap()
            .push(Edge::new("a", "ghost"));
        let err = g.check_integrity().unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { .. }));

        let mut g = sample();
        g.add_root("ghost".into());
        assert!(matches!(
            g.check_integrity().unwrap_err(),
            GraphError::MissingRoot(_)
        ));
    }

    #[test]
    fn test_structural_eq_ignores_sequence_and_attribution() {
        let a = sample();
        let mut b = Graph::new("dlg");
        for id in ["d", "c", "b", "a"] {
            b.insert_node(node(id));
        }
        b.add_root("a".into());
        b.add_edge(Edge::new("a", "b"));
        b.add_edge(Edge::new("a", "c"));
        b.add_edge(Edge::new("c", "a"));
        b.set_attribution("a".into(), ModId::new("x"));

        assert!(a.structurally_eq(&b));
        assert_ne!(a, b);
    }
}
