//! Converts a [`Graph`] back into a [`DialogResource`].

use std::collections::HashMap;

use uuid::Uuid;

use super::format::{DialogResource, EdgeRecord, NodeRecord, DIALOG_VARIANT};
use crate::graph::{Graph, Node, NodeId, Payload};

/// Serialize a graph. Local ids are replaced by fresh UUIDs and every edge
/// and root is rewritten to match; external ids are kept verbatim.
pub fn serialize(graph: &Graph) -> DialogResource {
    let mut names: HashMap<&NodeId, String> = HashMap::new();
    for node in graph.nodes() {
        let name = match &node.id {
            NodeId::External(id) => id.clone(),
            NodeId::Local { .. } => Uuid::new_v4().to_string(),
        };
        names.insert(&node.id, name);
    }
    let name_of = |id: &NodeId| names.get(id).cloned().unwrap_or_else(|| id.to_string());

    let nodes = graph
        .nodes()
        .map(|node| {
            let mut record = node_record(node);
            record.uuid = Some(name_of(&node.id));
            record.origin = graph.attribution(&node.id).map(|m| m.to_string());
            record
        })
        .collect();

    let mut edges = Vec::new();
    for source in graph.edge_sources() {
        for (rank, edge) in graph.edges_from(source).iter().enumerate() {
            edges.push(EdgeRecord {
                source: name_of(&edge.source),
                target: name_of(&edge.target),
                rank: Some(rank as u32),
                guard: edge.guard.clone(),
            });
        }
    }

    DialogResource {
        uuid: graph.resource_id().to_string(),
        variant: Some(DIALOG_VARIANT.to_string()),
        roots: graph.roots().iter().map(name_of).collect(),
        nodes,
        edges,
        extra: graph.extra().clone(),
    }
}

fn node_record(node: &Node) -> NodeRecord {
    let mut record = NodeRecord {
        uuid: None,
        kind: Some(node.kind().to_string()),
        text: None,
        condition: None,
        check_flags: Vec::new(),
        set_flags: Vec::new(),
        animation: None,
        script: None,
        destination: None,
        origin: None,
        extra: node.opaque.clone(),
    };
    match &node.payload {
        Payload::Question(line) | Payload::Answer(line) => {
            record.text = Some(line.text.clone());
            record.condition = line.condition.clone();
            record.check_flags = line.check_flags.clone();
            record.set_flags = line.set_flags.clone();
            record.animation = line.animation.clone();
        }
        Payload::AutomatedAction(step) => {
            record.script = Some(step.script.clone());
            record.condition = step.condition.clone();
            record.check_flags = step.check_flags.clone();
            record.set_flags = step.set_flags.clone();
        }
        Payload::Transition(step) => {
            record.destination = step.destination.clone();
            record.condition = step.condition.clone();
            record.check_flags = step.check_flags.clone();
            record.set_flags = step.set_flags.clone();
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Flag, ModId};
    use crate::resource::GraphBuilder;
    use serde_json::json;

    #[test]
    fn test_round_trip_identified_resource() {
        let text = json!({
            "uuid": "dlg",
            "variant": "dialog",
            "roots": ["q1"],
            "Category": "camp",
            "nodes": [
                {"uuid": "q1", "kind": "question", "text": "h",
                 "check_flags": [{"uuid": "f1", "value": true}], "Extra": [1, 2]},
                {"uuid": "s1", "kind": "automated_action", "script": "run"},
                {"uuid": "t1", "kind": "transition"}
            ],
            "edges": [
                {"source": "q1", "target": "s1", "rank": 0, "guard": "g"},
                {"source": "q1", "target": "t1", "rank": 1},
                {"source": "t1", "target": "q1", "rank": 0}
            ]
        })
        .to_string();
        let builder = GraphBuilder::new();
        let graph = builder.build_str(&text).unwrap();
        let rebuilt = builder.build(&serialize(&graph)).unwrap();
        assert!(graph.structurally_eq(&rebuilt));
    }

    #[test]
    fn test_local_ids_get_fresh_uuids() {
        let mut graph = Graph::new("dlg");
        let local = NodeId::local(1, 0);
        graph.insert_node(Node::new(local.clone(), Payload::answer("h")));
        graph.insert_node(Node::new("q", Payload::question("h")));
        graph.add_root("q".into());
        graph.add_edge(Edge::new(NodeId::from("q"), local.clone()));

        let res = serialize(&graph);
        let fresh = res.nodes[0].uuid.clone().unwrap();
        assert!(Uuid::parse_str(&fresh).is_ok());
        assert_eq!(res.edges[0].target, fresh);

        let rebuilt = GraphBuilder::new().build(&res).unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert!(rebuilt.check_integrity().is_ok());
    }

    #[test]
    fn test_stray_typed_keys_survive_round_trip() {
        let text = json!({
            "uuid": "dlg",
            "nodes": [
                {"uuid": "t1", "kind": "transition", "destination": "s", "animation": "wave", "text": "h-stray"},
                {"uuid": "s1", "kind": "automated_action", "script": "x", "animation": "bow"}
            ]
        })
        .to_string();
        let builder = GraphBuilder::new();
        let graph = builder.build_str(&text).unwrap();

        let emitted = serialize(&graph).to_json_string(false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&emitted).unwrap();
        assert_eq!(value["nodes"][0]["animation"], json!("wave"));
        assert_eq!(value["nodes"][0]["text"], json!("h-stray"));
        assert_eq!(value["nodes"][1]["animation"], json!("bow"));

        let rebuilt = builder.build_str(&emitted).unwrap();
        assert!(graph.structurally_eq(&rebuilt));
    }

    #[test]
    fn test_attribution_emitted_as_origin() {
        let mut graph = Graph::new("dlg");
        let mut node = Node::new("a", Payload::answer("h"));
        if let Payload::Answer(line) = &mut node.payload {
            line.set_flags.push(Flag::new("f", false));
        }
        graph.insert_node(node);
        graph.set_attribution("a".into(), ModId::new("mod-x"));

        let res = serialize(&graph);
        assert_eq!(res.nodes[0].origin.as_deref(), Some("mod-x"));
        assert_eq!(res.nodes[0].set_flags.len(), 1);
    }
}
