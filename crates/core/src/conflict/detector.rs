//! Conflict detection over the edit scripts of several mods.
//!
//! Operations are grouped by the [`Target`] they touch. A group touched by two
//! or more mods is an overlap; the detector classifies it, records it in the
//! [`ConflictReport`] and derives which operations the merge fold must skip.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use super::report::{AttributedOp, Classification, ConflictRecord, ConflictReport, Resolution, Target};
use crate::diff::{apply_order, EditOperation, ModContribution};
use crate::graph::{Field, Graph, ModId, NodeId};

/// Position of an operation: (contribution index, operation index).
pub type OpRef = (usize, usize);

/// Operations the merge fold must skip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    suppressed: BTreeSet<OpRef>,
}

impl ResolutionPlan {
    pub fn is_suppressed(&self, contribution: usize, op: usize) -> bool {
        self.suppressed.contains(&(contribution, op))
    }

    pub fn len(&self) -> usize {
        self.suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppressed.is_empty()
    }

    fn suppress(&mut self, at: OpRef) {
        self.suppressed.insert(at);
    }
}

/// Output of [`ConflictDetector::detect`].
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub report: ConflictReport,
    pub plan: ResolutionPlan,
}

/// The group key of an operation.
pub fn target_of(op: &EditOperation) -> Target {
    match op {
        EditOperation::NodeAdded { node } => Target::Node { id: node.id.clone() },
        EditOperation::NodeRemoved { id } => Target::Node { id: id.clone() },
        EditOperation::NodeFieldChanged { id, field, .. } => Target::Field {
            id: id.clone(),
            field: field.clone(),
        },
        EditOperation::EdgeAdded { edge } => Target::Edges {
            source: edge.source.clone(),
        },
        EditOperation::EdgeRemoved { source, .. }
        | EditOperation::EdgeGuardChanged { source, .. }
        | EditOperation::EdgeReordered { source, .. } => Target::Edges {
            source: source.clone(),
        },
        EditOperation::RootAdded { .. }
        | EditOperation::RootRemoved { .. }
        | EditOperation::RootsReordered { .. } => Target::Roots,
    }
}

/// Whether `op` relies on node `id` continuing to exist.
pub fn depends_on(op: &EditOperation, id: &NodeId) -> bool {
    match op {
        EditOperation::NodeFieldChanged { id: node, .. } => node == id,
        EditOperation::EdgeAdded { edge } => &edge.source == id || &edge.target == id,
        EditOperation::EdgeRemoved { source, .. } => source == id,
        EditOperation::EdgeGuardChanged { source, target, .. } => source == id || target == id,
        EditOperation::EdgeReordered { source, order } => source == id || order.contains(id),
        EditOperation::RootAdded { id: root } => root == id,
        _ => false,
    }
}

/// Stateless conflict detector.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Classify one group of operations competing for `target`.
    ///
    /// Returns `None` when fewer than two mods take part or when every mod
    /// produces the same result.
    pub fn classify(base: &Graph, target: &Target, ops: &[AttributedOp]) -> Option<Classification> {
        let mods: BTreeSet<&ModId> = ops.iter().map(|o| &o.mod_id).collect();
        if mods.len() < 2 {
            return None;
        }

        match target {
            Target::Node { id } => {
                let removers: BTreeSet<&ModId> = ops
                    .iter()
                    .filter(|o| matches!(o.op, EditOperation::NodeRemoved { .. }))
                    .map(|o| &o.mod_id)
                    .collect();
                if !removers.is_empty() {
                    let dependent = ops
                        .iter()
                        .any(|o| !removers.contains(&o.mod_id) && depends_on(&o.op, id));
                    return dependent.then_some(Classification::StructuralConflict);
                }
                let added: Vec<_> = ops
                    .iter()
                    .filter_map(|o| match &o.op {
                        EditOperation::NodeAdded { node } => Some(node),
                        _ => None,
                    })
                    .collect();
                let convergent = added.windows(2).all(|w| w[0] == w[1]);
                (!convergent).then_some(Classification::NodeValueConflict)
            }
            Target::Field { field, .. } => {
                let mixed = *field == Field::Kind
                    && ops.iter().any(|o| {
                        matches!(&o.op, EditOperation::NodeFieldChanged { field, .. } if *field != Field::Kind)
                    });
                if mixed {
                    return Some(Classification::NodeValueConflict);
                }
                let values: Vec<_> = ops
                    .iter()
                    .filter_map(|o| match &o.op {
                        EditOperation::NodeFieldChanged { new, .. } => Some(new),
                        _ => None,
                    })
                    .collect();
                let convergent = values.windows(2).all(|w| w[0] == w[1]);
                (!convergent).then_some(Classification::NodeValueConflict)
            }
            Target::Edges { .. } | Target::Roots => {
                let initial = initial_sequence(base, target);
                let mut results: BTreeMap<&ModId, Vec<Entry>> = BTreeMap::new();
                for mod_id in &mods {
                    let own = ops.iter().filter(|o| &o.mod_id == *mod_id).map(|o| &o.op);
                    results.insert(*mod_id, resulting_sequence(initial.clone(), own));
                }
                let lists: Vec<&Vec<Entry>> = results.values().collect();
                if lists.windows(2).all(|w| w[0] == w[1]) {
                    return None;
                }
                if compatible_adds(ops) {
                    Some(Classification::CompatibleAdd)
                } else {
                    Some(Classification::EdgeSetConflict)
                }
            }
        }
    }

    /// Detect every overlap between `contributions` and derive the
    /// resolution plan. Operation positions in the plan index into the slice
    /// as given.
    pub fn detect(base: &Graph, contributions: &[ModContribution]) -> Detection {
        info!(
            resource = %base.resource_id(),
            contributions = contributions.len(),
            "detecting conflicts"
        );

        let mut groups: BTreeMap<Target, Vec<OpRef>> = BTreeMap::new();
        for (ci, contribution) in contributions.iter().enumerate() {
            for (oi, op) in contribution.edits.iter().enumerate() {
                groups.entry(target_of(op)).or_default().push((ci, oi));
            }
        }

        let mut pass = Pass {
            base,
            contributions,
            detection: Detection::default(),
        };
        for (target, refs) in &groups {
            match target {
                Target::Node { id } => pass.node_group(target, id, refs),
                Target::Field { id, field: Field::Kind } => {
                    let fields = kind_sensitive_edits(&groups, id, refs);
                    pass.kind_group(target, refs, &fields);
                }
                Target::Field { .. } => pass.field_group(target, refs),
                Target::Edges { .. } | Target::Roots => pass.sequence_group(target, refs),
            }
        }

        let mut detection = pass.detection;
        detection.report.records.sort_by(|a, b| a.target.cmp(&b.target));
        info!(
            conflicts = detection.report.records.len(),
            compatible = detection.report.compatible.len(),
            suppressed = detection.plan.len(),
            "conflict detection complete"
        );
        detection
    }
}

// ---------------------------------------------------------------------------
// Detection pass
// ---------------------------------------------------------------------------

struct Pass<'a> {
    base: &'a Graph,
    contributions: &'a [ModContribution],
    detection: Detection,
}

impl<'a> Pass<'a> {
    fn op(&self, at: OpRef) -> &'a EditOperation {
        &self.contributions[at.0].edits[at.1]
    }

    fn priority(&self, at: OpRef) -> (u32, usize) {
        (self.contributions[at.0].priority, at.0)
    }

    fn mod_id(&self, at: OpRef) -> ModId {
        self.contributions[at.0].mod_id.clone()
    }

    fn top(&self, refs: &[OpRef]) -> Option<OpRef> {
        refs.iter().copied().max_by_key(|at| self.priority(*at))
    }

    /// Attributed copies of `refs`, highest priority first.
    fn attributed(&self, refs: &[OpRef]) -> Vec<AttributedOp> {
        let mut sorted = refs.to_vec();
        sorted.sort_by(|a, b| self.priority(*b).cmp(&self.priority(*a)).then(a.1.cmp(&b.1)));
        sorted
            .into_iter()
            .map(|at| AttributedOp {
                mod_id: self.mod_id(at),
                priority: self.contributions[at.0].priority,
                op: self.op(at).clone(),
            })
            .collect()
    }

    fn record(
        &mut self,
        target: &Target,
        classification: Classification,
        operations: Vec<AttributedOp>,
        resolution: Resolution,
    ) {
        debug!(
            target = %target,
            classification = %classification,
            resolution = %resolution,
            "conflict detected"
        );
        let record = ConflictRecord {
            target: target.clone(),
            classification,
            operations,
            resolution,
        };
        if classification == Classification::CompatibleAdd {
            self.detection.report.compatible.push(record);
        } else {
            self.detection.report.records.push(record);
        }
    }

    fn node_group(&mut self, target: &Target, id: &NodeId, refs: &[OpRef]) {
        let removers: Vec<OpRef> = refs
            .iter()
            .copied()
            .filter(|at| matches!(self.op(*at), EditOperation::NodeRemoved { .. }))
            .collect();

        if removers.is_empty() {
            let ops = self.attributed(refs);
            let Some(classification) = ConflictDetector::classify(self.base, target, &ops) else {
                return;
            };
            let Some(winner) = self.top(refs) else {
                return;
            };
            for at in refs.iter().copied().filter(|at| at.0 != winner.0) {
                self.detection.plan.suppress(at);
            }
            let resolution = Resolution::HigherPriorityWins {
                winner: self.mod_id(winner),
            };
            self.record(target, classification, ops, resolution);
            return;
        }

        let remover_mods: BTreeSet<usize> = removers.iter().map(|at| at.0).collect();
        let mut dependents = Vec::new();
        for (ci, contribution) in self.contributions.iter().enumerate() {
            if remover_mods.contains(&ci) {
                continue;
            }
            for (oi, op) in contribution.edits.iter().enumerate() {
                if depends_on(op, id) {
                    dependents.push((ci, oi));
                }
            }
        }
        let (Some(top_remover), Some(top_dependent)) = (self.top(&removers), self.top(&dependents)) else {
            // Deleted by one or more mods with nobody depending on it.
            return;
        };

        let mut participants = removers.clone();
        participants.extend(dependents.iter().copied());
        let ops = self.attributed(&participants);

        let resolution = if self.priority(top_remover) > self.priority(top_dependent) {
            for at in removers.iter().copied().filter(|at| *at != top_remover) {
                self.detection.plan.suppress(at);
            }
            Resolution::DeletionApplied {
                remover: self.mod_id(top_remover),
                redirects: Vec::new(),
            }
        } else {
            for ci in &remover_mods {
                for (oi, op) in self.contributions[*ci].edits.iter().enumerate() {
                    let touches = match op {
                        EditOperation::NodeRemoved { id: n } | EditOperation::RootRemoved { id: n } => n == id,
                        EditOperation::EdgeRemoved { source, target } => source == id || target == id,
                        _ => false,
                    };
                    if touches {
                        self.detection.plan.suppress((*ci, oi));
                    }
                }
            }
            Resolution::DeletionSuppressed {
                kept_by: self.mod_id(top_dependent),
                reattached_to: None,
            }
        };
        self.record(target, Classification::StructuralConflict, ops, resolution);
    }

    /// `refs` are kind changes of one node; `fields` are payload edits of the
    /// same node by mods that did not change its kind.
    fn kind_group(&mut self, target: &Target, refs: &[OpRef], fields: &[OpRef]) {
        let mut participants = refs.to_vec();
        participants.extend(fields.iter().copied());
        let ops = self.attributed(&participants);
        let Some(classification) = ConflictDetector::classify(self.base, target, &ops) else {
            return;
        };
        let Some(winner) = self.top(&participants) else {
            return;
        };

        let winner_changed_kind = refs.contains(&winner);
        for at in participants.iter().copied() {
            let lower = at.0 != winner.0;
            // A winning field edit suppresses every kind change; a winning kind
            // change suppresses everything below it.
            if lower && (winner_changed_kind || refs.contains(&at)) {
                self.detection.plan.suppress(at);
            }
        }
        let resolution = Resolution::HigherPriorityWins {
            winner: self.mod_id(winner),
        };
        self.record(target, classification, ops, resolution);
    }

    fn field_group(&mut self, target: &Target, refs: &[OpRef]) {
        let ops = self.attributed(refs);
        let Some(classification) = ConflictDetector::classify(self.base, target, &ops) else {
            return;
        };
        let Some(winner) = self.top(refs) else {
            return;
        };
        for at in refs.iter().copied().filter(|at| at.0 != winner.0) {
            self.detection.plan.suppress(at);
        }
        let resolution = Resolution::HigherPriorityWins {
            winner: self.mod_id(winner),
        };
        self.record(target, classification, ops, resolution);
    }

    fn sequence_group(&mut self, target: &Target, refs: &[OpRef]) {
        let ops = self.attributed(refs);
        let Some(classification) = ConflictDetector::classify(self.base, target, &ops) else {
            return;
        };
        if classification == Classification::CompatibleAdd {
            self.record(target, classification, ops, Resolution::AllApplied);
            return;
        }
        let Some(winner) = self.top(refs) else {
            return;
        };

        let winner_ops = refs
            .iter()
            .filter(|at| at.0 == winner.0)
            .map(|at| self.op(*at));
        let kept = resulting_sequence(initial_sequence(self.base, target), winner_ops);
        let retains = |id: &NodeId| kept.iter().any(|(n, _)| n == id);

        let mut suppressed = Vec::new();
        for at in refs.iter().copied().filter(|at| at.0 != winner.0) {
            let suppress = match self.op(at) {
                EditOperation::EdgeRemoved { target: removed, .. }
                | EditOperation::RootRemoved { id: removed } => {
                    retains(removed) && !self.removes_node(at.0, removed)
                }
                EditOperation::EdgeGuardChanged { .. }
                | EditOperation::EdgeReordered { .. }
                | EditOperation::RootsReordered { .. } => true,
                _ => false,
            };
            if suppress {
                suppressed.push(at);
            }
        }
        for at in suppressed {
            self.detection.plan.suppress(at);
        }

        let resolution = Resolution::HigherPriorityWins {
            winner: self.mod_id(winner),
        };
        self.record(target, classification, ops, resolution);
    }

    fn removes_node(&self, contribution: usize, id: &NodeId) -> bool {
        self.contributions[contribution]
            .edits
            .iter()
            .any(|op| matches!(op, EditOperation::NodeRemoved { id: n } if n == id))
    }
}

/// Non-kind payload edits of the node behind a `Field(id, Kind)` group, from
/// mods that did not themselves change the kind.
fn kind_sensitive_edits(groups: &BTreeMap<Target, Vec<OpRef>>, id: &NodeId, kind_refs: &[OpRef]) -> Vec<OpRef> {
    let kind_mods: BTreeSet<usize> = kind_refs.iter().map(|at| at.0).collect();
    groups
        .iter()
        .filter(|(target, _)| match target {
            Target::Field { id: node, field } => {
                node == id && *field != Field::Kind && !matches!(field, Field::Opaque(_))
            }
            _ => false,
        })
        .flat_map(|(_, refs)| refs.iter().copied())
        .filter(|at| !kind_mods.contains(&at.0))
        .collect()
}

// ---------------------------------------------------------------------------
// Resulting sequences
// ---------------------------------------------------------------------------

/// A list entry: target (or root) id and guard.
type Entry = (NodeId, Option<String>);

fn initial_sequence(base: &Graph, target: &Target) -> Vec<Entry> {
    match target {
        Target::Edges { source } => base
            .edges_from(source)
            .iter()
            .map(|e| (e.target.clone(), e.guard.clone()))
            .collect(),
        Target::Roots => base.roots().iter().map(|r| (r.clone(), None)).collect(),
        _ => Vec::new(),
    }
}

/// The list one mod ends up with after applying its own operations.
fn resulting_sequence<'o>(mut list: Vec<Entry>, ops: impl Iterator<Item = &'o EditOperation>) -> Vec<Entry> {
    for op in ops {
        match op {
            EditOperation::EdgeRemoved { target: id, .. } | EditOperation::RootRemoved { id } => {
                list.retain(|(n, _)| n != id);
            }
            EditOperation::EdgeAdded { edge } => {
                if !list.iter().any(|(n, _)| n == &edge.target) {
                    list.push((edge.target.clone(), edge.guard.clone()));
                }
            }
            EditOperation::RootAdded { id } => {
                if !list.iter().any(|(n, _)| n == id) {
                    list.push((id.clone(), None));
                }
            }
            EditOperation::EdgeGuardChanged { target, new, .. } => {
                if let Some(entry) = list.iter_mut().find(|(n, _)| n == target) {
                    entry.1 = new.clone();
                }
            }
            EditOperation::EdgeReordered { order, .. } | EditOperation::RootsReordered { order } => {
                apply_order(&mut list, order, |(n, _)| n);
            }
            _ => {}
        }
    }
    list
}

/// Every operation is an addition and no target is added by two mods.
fn compatible_adds(ops: &[AttributedOp]) -> bool {
    let mut seen: BTreeMap<&NodeId, &ModId> = BTreeMap::new();
    for o in ops {
        let added = match &o.op {
            EditOperation::EdgeAdded { edge } => &edge.target,
            EditOperation::RootAdded { id } => id,
            _ => return false,
        };
        if let Some(owner) = seen.insert(added, &o.mod_id) {
            if owner != &o.mod_id {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, FieldValue, Node, Payload};

    fn base() -> Graph {
        let mut g = Graph::new("dlg");
        for id in ["q", "a1", "a2", "end"] {
            g.insert_node(Node::new(id, Payload::answer(format!("h-{}", id))));
        }
        g.add_root("q".into());
        g.add_edge(Edge::new("q", "a1"));
        g.add_edge(Edge::new("q", "a2"));
        g.add_edge(Edge::new("a1", "end"));
        g
    }

    fn contribution(id: &str, priority: u32, modify: impl FnOnce(&mut Graph)) -> ModContribution {
        let b = base();
        let mut m = base();
        modify(&mut m);
        ModContribution::from_graphs(id, priority, &b, &m)
    }

    fn set_text(g: &mut Graph, id: &str, text: &str) {
        g.node_mut(&id.into())
            .unwrap()
            .set_field(&Field::Text, FieldValue::Ref(text.into()))
            .unwrap();
    }

    #[test]
    fn test_disjoint_edits_have_no_conflicts() {
        let a = contribution("a", 1, |g| set_text(g, "a1", "x"));
        let b = contribution("b", 2, |g| set_text(g, "a2", "y"));
        let detection = ConflictDetector::detect(&base(), &[a, b]);
        assert!(detection.report.is_empty());
        assert!(detection.plan.is_empty());
    }

    #[test]
    fn test_same_field_conflict_suppresses_lower() {
        let a = contribution("a", 1, |g| set_text(g, "a1", "x"));
        let b = contribution("b", 2, |g| set_text(g, "a1", "y"));
        let detection = ConflictDetector::detect(&base(), &[a, b]);

        assert_eq!(detection.report.len(), 1);
        let record = &detection.report.records[0];
        assert_eq!(record.classification, Classification::NodeValueConflict);
        assert_eq!(record.operations[0].mod_id, ModId::new("b"));
        assert!(detection.plan.is_suppressed(0, 0));
        assert!(!detection.plan.is_suppressed(1, 0));
    }

    #[test]
    fn test_identical_writes_are_convergent() {
        let a = contribution("a", 1, |g| set_text(g, "a1", "same"));
        let b = contribution("b", 2, |g| set_text(g, "a1", "same"));
        let detection = ConflictDetector::detect(&base(), &[a, b]);
        assert!(detection.report.is_empty());
    }

    #[test]
    fn test_distinct_edge_additions_are_compatible() {
        let a = contribution("a", 1, |g| {
            g.insert_node(Node::new("x", Payload::answer("h")));
            g.add_edge(Edge::new("q", "x"));
        });
        let b = contribution("b", 2, |g| {
            g.insert_node(Node::new("y", Payload::answer("h")));
            g.add_edge(Edge::new("q", "y"));
        });
        let detection = ConflictDetector::detect(&base(), &[a, b]);
        assert!(detection.report.is_clean());
        assert_eq!(detection.report.compatible.len(), 1);
        assert_eq!(detection.report.compatible[0].resolution, Resolution::AllApplied);
    }

    #[test]
    fn test_reorder_against_removal_is_edge_set_conflict() {
        let a = contribution("a", 1, |g| {
            g.remove_edge(&"q".into(), &"a1".into());
        });
        let b = contribution("b", 2, |g| {
            g.edges_mut(&"q".into()).unwrap().swap(0, 1);
        });
        let detection = ConflictDetector::detect(&base(), &[a, b]);
        let record = detection
            .report
            .find(&Target::Edges { source: "q".into() })
            .unwrap();
        assert_eq!(record.classification, Classification::EdgeSetConflict);
        // b keeps q -> a1, so a's removal is skipped.
        assert!(detection.plan.is_suppressed(0, 0));
    }

    #[test]
    fn test_deletion_below_dependent_is_suppressed() {
        let a = contribution("a", 1, |g| {
            g.remove_node(&"a2".into());
        });
        let b = contribution("b", 2, |g| set_text(g, "a2", "edited"));
        let detection = ConflictDetector::detect(&base(), &[a.clone(), b]);

        let record = detection.report.find(&Target::Node { id: "a2".into() }).unwrap();
        assert_eq!(record.classification, Classification::StructuralConflict);
        assert_eq!(
            record.resolution,
            Resolution::DeletionSuppressed {
                kept_by: ModId::new("b"),
                reattached_to: None,
            }
        );
        // Both the edge removal and the node removal of mod a are skipped.
        assert_eq!(a.edits.len(), 2);
        assert!(detection.plan.is_suppressed(0, 0));
        assert!(detection.plan.is_suppressed(0, 1));
    }

    #[test]
    fn test_deletion_above_dependent_proceeds() {
        let a = contribution("a", 1, |g| set_text(g, "a2", "edited"));
        let b = contribution("b", 2, |g| {
            g.remove_node(&"a2".into());
        });
        let detection = ConflictDetector::detect(&base(), &[a, b]);
        let record = detection.report.find(&Target::Node { id: "a2".into() }).unwrap();
        assert!(matches!(record.resolution, Resolution::DeletionApplied { .. }));
        assert!(detection.plan.is_empty());
    }

    #[test]
    fn test_kind_change_against_field_edit() {
        let a = contribution("a", 1, |g| {
            g.node_mut(&"a1".into()).unwrap().payload = Payload::action("s");
        });
        let b = contribution("b", 2, |g| set_text(g, "a1", "edited"));
        let detection = ConflictDetector::detect(&base(), &[a, b]);

        let record = detection
            .report
            .find(&Target::Field {
                id: "a1".into(),
                field: Field::Kind,
            })
            .unwrap();
        assert_eq!(record.classification, Classification::NodeValueConflict);
        assert!(detection.plan.is_suppressed(0, 0));
        assert!(!detection.plan.is_suppressed(1, 0));
    }

    #[test]
    fn test_classify_needs_two_mods() {
        let op = AttributedOp {
            mod_id: ModId::new("a"),
            priority: 1,
            op: EditOperation::RootAdded { id: "x".into() },
        };
        assert_eq!(
            ConflictDetector::classify(&base(), &Target::Roots, &[op.clone(), op]),
            None
        );
    }
}
