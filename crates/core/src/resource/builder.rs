//! Builds a [`Graph`] from a [`DialogResource`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::format::{DialogResource, NodeRecord, DIALOG_VARIANT};
use crate::errors::ResourceError;
use crate::graph::{ActionStep, DialogLine, Edge, Graph, ModId, Node, NodeId, NodeKind, Payload, TransitionStep};

// ---------------------------------------------------------------------------
// Dialog index
// ---------------------------------------------------------------------------

/// Lookup of resource metadata kept outside the resource itself.
///
/// Passed to the builder explicitly; the engine keeps no global index.
pub trait DialogIndex: Send + Sync {
    /// Variant of the resource, for resources that do not declare one.
    fn variant_of(&self, resource_id: &str) -> Option<String>;

    /// Human-readable name used in logs.
    fn display_name(&self, resource_id: &str) -> Option<String>;
}

/// Entry of a [`StaticIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub variant: String,
}

/// An in-memory [`DialogIndex`].
#[derive(Debug, Clone, Default)]
pub struct StaticIndex {
    entries: HashMap<String, IndexEntry>,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        resource_id: impl Into<String>,
        name: impl Into<String>,
        variant: impl Into<String>,
    ) {
        self.entries.insert(
            resource_id.into(),
            IndexEntry {
                name: name.into(),
                variant: variant.into(),
            },
        );
    }
}

impl DialogIndex for StaticIndex {
    fn variant_of(&self, resource_id: &str) -> Option<String> {
        self.entries.get(resource_id).map(|e| e.variant.clone())
    }

    fn display_name(&self, resource_id: &str) -> Option<String> {
        self.entries.get(resource_id).map(|e| e.name.clone())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Converts resources into graphs.
///
/// `scope` is stamped into the local ids of nodes without an external id so
/// anonymous nodes from different resources never collide. The session uses
/// scope 0 for the baseline and `i + 1` for the i-th mod.
#[derive(Clone, Default)]
pub struct GraphBuilder {
    index: Option<Arc<dyn DialogIndex>>,
    scope: u32,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: Arc<dyn DialogIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_scope(mut self, scope: u32) -> Self {
        self.scope = scope;
        self
    }

    /// Parse JSON text and build it.
    pub fn build_str(&self, text: &str) -> Result<Graph, ResourceError> {
        let resource = DialogResource::from_json_str(text)?;
        self.build(&resource)
    }

    /// Build a graph from a parsed resource.
    pub fn build(&self, resource: &DialogResource) -> Result<Graph, ResourceError> {
        if resource.uuid.is_empty() {
            return Err(ResourceError::Parse("resource uuid is empty".into()));
        }

        let variant = match &resource.variant {
            Some(v) => v.clone(),
            None => self
                .index
                .as_ref()
                .and_then(|idx| idx.variant_of(&resource.uuid))
                .unwrap_or_else(|| DIALOG_VARIANT.to_string()),
        };
        if variant != DIALOG_VARIANT {
            return Err(ResourceError::UnsupportedVariant(variant));
        }

        let mut graph = Graph::new(resource.uuid.clone());
        for (key, value) in &resource.extra {
            graph.extra_mut().insert(key.clone(), value.clone());
        }

        let mut ids = Vec::with_capacity(resource.nodes.len());
        for (index, record) in resource.nodes.iter().enumerate() {
            let id = self.node_id(record, index)?;
            let (node, origin) = build_node(id.clone(), record)?;
            if graph.insert_node(node).is_some() {
                return Err(ResourceError::DuplicateId(id.to_string()));
            }
            if let Some(origin) = origin {
                graph.set_attribution(id.clone(), origin);
            }
            ids.push(id);
        }

        for root in &resource.roots {
            let id = self.resolve(root, &ids, &graph)?;
            if !graph.add_root(id) {
                return Err(ResourceError::Parse(format!("duplicate root '{}'", root)));
            }
        }

        // Ranks order siblings; records without a rank keep list order.
        let mut by_source: BTreeMap<NodeId, Vec<(u32, usize, Edge)>> = BTreeMap::new();
        for (position, record) in resource.edges.iter().enumerate() {
            let source = self.resolve(&record.source, &ids, &graph)?;
            let target = self.resolve(&record.target, &ids, &graph)?;
            let rank = record.rank.unwrap_or(position as u32);
            by_source.entry(source.clone()).or_default().push((
                rank,
                position,
                Edge {
                    source,
                    target,
                    guard: record.guard.clone(),
                },
            ));
        }
        for (_, mut list) in by_source {
            list.sort_by_key(|(rank, position, _)| (*rank, *position));
            for (_, _, edge) in list {
                let (source, target) = (edge.source.to_string(), edge.target.to_string());
                if !graph.add_edge(edge) {
                    return Err(ResourceError::Parse(format!(
                        "duplicate edge {} -> {}",
                        source, target
                    )));
                }
            }
        }

        let name = self
            .index
            .as_ref()
            .and_then(|idx| idx.display_name(&resource.uuid))
            .unwrap_or_else(|| resource.uuid.clone());
        debug!(
            resource = %name,
            nodes = graph.len(),
            roots = graph.roots().len(),
            scope = self.scope,
            "built dialog graph"
        );

        Ok(graph)
    }

    fn node_id(&self, record: &NodeRecord, index: usize) -> Result<NodeId, ResourceError> {
        match &record.uuid {
            Some(uuid) if uuid.is_empty() => {
                Err(ResourceError::Parse(format!("node {} has an empty uuid", index)))
            }
            Some(uuid) if uuid.starts_with('#') => Err(ResourceError::Parse(format!(
                "node uuid '{}' uses the reserved '#' prefix",
                uuid
            ))),
            Some(uuid) => Ok(NodeId::external(uuid.clone())),
            None => Ok(NodeId::local(self.scope, index as u32)),
        }
    }

    /// Resolve a reference from the roots or edges list.
    fn resolve(&self, reference: &str, ids: &[NodeId], graph: &Graph) -> Result<NodeId, ResourceError> {
        let id = match reference.strip_prefix('#') {
            Some(index) => {
                let index: usize = index
                    .parse()
                    .map_err(|_| ResourceError::Parse(format!("invalid local reference '{}'", reference)))?;
                ids.get(index)
                    .cloned()
                    .ok_or_else(|| ResourceError::Parse(format!("reference '{}' is out of range", reference)))?
            }
            None => NodeId::external(reference),
        };
        if !graph.contains(&id) {
            return Err(ResourceError::Parse(format!(
                "reference to unknown node '{}'",
                reference
            )));
        }
        Ok(id)
    }
}

fn required(value: &Option<String>, field: &str, id: &NodeId) -> Result<String, ResourceError> {
    value
        .clone()
        .ok_or_else(|| ResourceError::Parse(format!("node '{}' is missing required field '{}'", id, field)))
}

fn build_node(id: NodeId, record: &NodeRecord) -> Result<(Node, Option<ModId>), ResourceError> {
    let kind_tag = record
        .kind
        .as_deref()
        .ok_or_else(|| ResourceError::Parse(format!("node '{}' has no kind", id)))?;
    let kind: NodeKind = kind_tag.parse().map_err(ResourceError::Parse)?;

    let payload = match kind {
        NodeKind::Question | NodeKind::Answer => {
            let line = DialogLine {
                text: required(&record.text, "text", &id)?,
                condition: record.condition.clone(),
                check_flags: record.check_flags.clone(),
                set_flags: record.set_flags.clone(),
                animation: record.animation.clone(),
            };
            if kind == NodeKind::Question {
                Payload::Question(line)
            } else {
                Payload::Answer(line)
            }
        }
        NodeKind::AutomatedAction => Payload::AutomatedAction(ActionStep {
            script: required(&record.script, "script", &id)?,
            condition: record.condition.clone(),
            check_flags: record.check_flags.clone(),
            set_flags: record.set_flags.clone(),
        }),
        NodeKind::Transition => Payload::Transition(TransitionStep {
            destination: record.destination.clone(),
            condition: record.condition.clone(),
            check_flags: record.check_flags.clone(),
            set_flags: record.set_flags.clone(),
        }),
    };

    let mut node = Node::new(id, payload);
    node.opaque = record.extra.clone();
    stash_inapplicable(&mut node, record);
    Ok((node, record.origin.clone().map(ModId::new)))
}

/// Keep typed keys the node's kind does not carry as opaque sub-fields, so
/// they are re-emitted unchanged.
fn stash_inapplicable(node: &mut Node, record: &NodeRecord) {
    let kind = node.kind();
    let line = matches!(kind, NodeKind::Question | NodeKind::Answer);
    let typed = [
        ("text", &record.text, line),
        ("animation", &record.animation, line),
        ("script", &record.script, kind == NodeKind::AutomatedAction),
        ("destination", &record.destination, kind == NodeKind::Transition),
    ];
    for (key, value, applies) in typed {
        if let (false, Some(value)) = (applies, value) {
            node.opaque
                .insert(key.to_string(), Value::String(value.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Field, FieldValue};
    use serde_json::json;

    fn build(value: serde_json::Value) -> Result<Graph, ResourceError> {
        GraphBuilder::new().build_str(&value.to_string())
    }

    #[test]
    fn test_build_basic_graph() {
        let g = build(json!({
            "uuid": "dlg",
            "roots": ["q1"],
            "nodes": [
                {"uuid": "q1", "kind": "question", "text": "h-q1"},
                {"uuid": "a1", "kind": "answer", "text": "h-a1", "Approval": 5},
                {"uuid": "t1", "kind": "transition", "destination": "scene-2"}
            ],
            "edges": [
                {"source": "q1", "target": "t1", "rank": 1},
                {"source": "q1", "target": "a1", "rank": 0, "guard": "cond-x"}
            ]
        }))
        .unwrap();

        let q1 = NodeId::from("q1");
        assert_eq!(g.children(&q1), vec![NodeId::from("a1"), NodeId::from("t1")]);
        assert_eq!(g.edge(&q1, &"a1".into()).unwrap().guard.as_deref(), Some("cond-x"));
        assert_eq!(
            g.node(&"a1".into()).unwrap().field(&Field::Opaque("Approval".into())),
            Some(FieldValue::Opaque(json!(5)))
        );
        assert_eq!(g.node(&"t1".into()).unwrap().kind(), NodeKind::Transition);
    }

    #[test]
    fn test_local_ids_use_builder_scope() {
        let text = json!({
            "uuid": "dlg",
            "roots": ["#0"],
            "nodes": [
                {"kind": "question", "text": "h"},
                {"kind": "answer", "text": "h2"}
            ],
            "edges": [{"source": "#0", "target": "#1"}]
        })
        .to_string();
        let g = GraphBuilder::new().with_scope(3).build_str(&text).unwrap();
        assert_eq!(g.roots(), &[NodeId::local(3, 0)]);
        assert_eq!(g.children(&NodeId::local(3, 0)), vec![NodeId::local(3, 1)]);
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let err = build(json!({
            "uuid": "dlg",
            "nodes": [{"uuid": "x", "kind": "cinematic"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ResourceError::Parse(_)));
    }

    #[test]
    fn test_missing_required_field() {
        let err = build(json!({
            "uuid": "dlg",
            "nodes": [{"uuid": "x", "kind": "automated_action"}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("script"));
    }

    #[test]
    fn test_dangling_edge_is_parse_error() {
        let err = build(json!({
            "uuid": "dlg",
            "nodes": [{"uuid": "x", "kind": "answer", "text": "h"}],
            "edges": [{"source": "x", "target": "ghost"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ResourceError::Parse(_)));
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let err = build(json!({
            "uuid": "dlg",
            "nodes": [
                {"uuid": "x", "kind": "answer", "text": "h"},
                {"uuid": "y", "kind": "answer", "text": "h"}
            ],
            "edges": [{"source": "x", "target": "y"}, {"source": "x", "target": "y"}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate edge"));
    }

    #[test]
    fn test_duplicate_node_id() {
        let err = build(json!({
            "uuid": "dlg",
            "nodes": [
                {"uuid": "x", "kind": "answer", "text": "h"},
                {"uuid": "x", "kind": "question", "text": "h"}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateId(id) if id == "x"));
    }

    #[test]
    fn test_unsupported_variant() {
        let err = build(json!({"uuid": "dlg", "variant": "voice_bark"})).unwrap_err();
        assert!(matches!(err, ResourceError::UnsupportedVariant(v) if v == "voice_bark"));
    }

    #[test]
    fn test_index_supplies_missing_variant() {
        let mut index = StaticIndex::new();
        index.insert("dlg", "Camp Night", "voice_bark");
        let builder = GraphBuilder::new().with_index(Arc::new(index));

        let err = builder
            .build_str(&json!({"uuid": "dlg"}).to_string())
            .unwrap_err();
        assert!(matches!(err, ResourceError::UnsupportedVariant(_)));

        // An explicit variant wins over the index.
        builder
            .build_str(&json!({"uuid": "dlg", "variant": "dialog"}).to_string())
            .unwrap();
    }

    #[test]
    fn test_inapplicable_keys_kept_as_opaque() {
        let g = build(json!({
            "uuid": "dlg",
            "nodes": [
                {"uuid": "t1", "kind": "transition", "destination": "s", "animation": "wave", "text": "h-stray"},
                {"uuid": "s1", "kind": "automated_action", "script": "x", "animation": "bow"},
                {"uuid": "a1", "kind": "answer", "text": "h", "script": "leftover"}
            ]
        }))
        .unwrap();

        let t1 = g.node(&"t1".into()).unwrap();
        assert_eq!(t1.opaque.get("animation"), Some(&json!("wave")));
        assert_eq!(t1.opaque.get("text"), Some(&json!("h-stray")));
        assert!(!t1.opaque.contains_key("destination"));
        let s1 = g.node(&"s1".into()).unwrap();
        assert_eq!(s1.opaque.get("animation"), Some(&json!("bow")));
        let a1 = g.node(&"a1".into()).unwrap();
        assert_eq!(
            a1.field(&Field::Opaque("script".into())),
            Some(FieldValue::Opaque(json!("leftover")))
        );
    }

    #[test]
    fn test_origin_becomes_attribution() {
        let g = build(json!({
            "uuid": "dlg",
            "nodes": [{"uuid": "x", "kind": "answer", "text": "h", "origin": "mod-a"}]
        }))
        .unwrap();
        assert_eq!(g.attribution(&"x".into()), Some(&ModId::new("mod-a")));
    }
}
