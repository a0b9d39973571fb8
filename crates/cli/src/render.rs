//! Table rendering for merge results.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use dlgmerge_core::conflict::ConflictRecord;
use dlgmerge_core::graph::{Graph, NodeKind};
use dlgmerge_core::merge::ContributionSummary;

use crate::style;

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

/// One row per conflict record: target, classification, mods and outcome.
pub fn conflicts(records: &[ConflictRecord]) -> Table {
    let mut t = table(vec!["Target", "Class", "Mods", "Resolution"]);
    for record in records {
        let mods = record
            .mods()
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        t.add_row(vec![
            Cell::new(record.target.to_string()),
            Cell::new(style::classification(record.classification)),
            Cell::new(mods),
            Cell::new(record.resolution.to_string()),
        ]);
    }
    t
}

pub fn contributions(summaries: &[ContributionSummary]) -> Table {
    let mut t = table(vec!["Mod", "Priority", "Applied", "Skipped"]);
    for s in summaries {
        t.add_row(vec![
            Cell::new(s.mod_id.to_string()),
            Cell::new(s.priority),
            Cell::new(s.applied),
            Cell::new(s.skipped),
        ]);
    }
    t
}

/// Node counts per kind plus edge, root and orphan totals.
pub fn graph_summary(graph: &Graph) -> Table {
    let mut t = table(vec!["Item", "Count"]);
    for kind in [
        NodeKind::Question,
        NodeKind::Answer,
        NodeKind::AutomatedAction,
        NodeKind::Transition,
    ] {
        let count = graph.nodes().filter(|n| n.kind() == kind).count();
        t.add_row(vec![Cell::new(format!("{} nodes", kind)), Cell::new(count)]);
    }
    let edges: usize = graph
        .edge_sources()
        .map(|source| graph.edges_from(source).len())
        .sum();
    t.add_row(vec![Cell::new("edges"), Cell::new(edges)]);
    t.add_row(vec![Cell::new("roots"), Cell::new(graph.roots().len())]);
    t.add_row(vec![Cell::new("orphans"), Cell::new(graph.orphans().len())]);
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlgmerge_core::graph::{Edge, Node, Payload};

    #[test]
    fn test_graph_summary_counts() {
        let mut graph = Graph::new("dlg");
        graph.insert_node(Node::new("q", Payload::question("h-q")));
        graph.insert_node(Node::new("a", Payload::answer("h-a")));
        graph.insert_node(Node::new("lost", Payload::action("noop")));
        graph.add_root("q".into());
        graph.add_edge(Edge::new("q", "a"));

        let rendered = graph_summary(&graph).to_string();
        assert!(rendered.contains("question nodes"));
        assert!(rendered.contains("automated_action nodes"));
        assert!(rendered.contains("orphans"));
    }

    #[test]
    fn test_contribution_table_lists_mods() {
        let rendered = contributions(&[ContributionSummary {
            mod_id: "better-camp".into(),
            priority: 7,
            applied: 3,
            skipped: 1,
        }])
        .to_string();
        assert!(rendered.contains("better-camp"));
    }
}
