//! Priority-ordered merge of mod contributions into one graph.
//!
//! The engine validates the contributions, runs the conflict detector over
//! all of them, and folds the non-suppressed edits into a copy of the
//! baseline from the lowest priority to the highest. Later writes replace
//! earlier ones, so the highest-priority mod decides every contested value.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::{ConflictDetector, ConflictReport, Redirect, Resolution, Target};
use crate::diff::{apply_order, EditOperation, ModContribution};
use crate::errors::MergeError;
use crate::graph::{Edge, Graph, ModId, NodeId};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation shared between a caller and a running merge.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Tunables for a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Treat nodes no root reaches as a failure instead of reporting them.
    pub fail_on_orphans: bool,
}

/// Per-mod bookkeeping from the fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionSummary {
    pub mod_id: ModId,
    pub priority: u32,
    pub applied: usize,
    pub skipped: usize,
}

/// A completed merge.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub graph: Graph,
    pub report: ConflictReport,
    /// One entry per contribution, in fold order.
    pub summaries: Vec<ContributionSummary>,
}

/// Outcome of [`MergeEngine::merge`].
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged(MergeResult),
    /// Cancelled between fold steps; no partial result is kept.
    Aborted,
}

impl MergeOutcome {
    pub fn into_merged(self) -> Option<MergeResult> {
        match self {
            Self::Merged(result) => Some(result),
            Self::Aborted => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Folds contributions into a baseline graph.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    options: MergeOptions,
    cancel: CancelFlag,
}

impl MergeEngine {
    pub fn new(options: MergeOptions) -> Self {
        Self {
            options,
            cancel: CancelFlag::new(),
        }
    }

    /// Observe `cancel` between fold steps.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Merge `contributions` into `base`.
    pub fn merge(&self, base: &Graph, contributions: &[ModContribution]) -> Result<MergeOutcome, MergeError> {
        validate(contributions)?;
        info!(
            resource = %base.resource_id(),
            contributions = contributions.len(),
            "starting merge"
        );

        let detection = ConflictDetector::detect(base, contributions);
        let mut report = detection.report;

        let mut order: Vec<usize> = (0..contributions.len()).collect();
        order.sort_by_key(|ci| contributions[*ci].priority);

        let mut fold = Fold::new(base);
        let mut summaries = Vec::with_capacity(order.len());
        for ci in order {
            let contribution = &contributions[ci];
            let removals: BTreeSet<&NodeId> = contribution
                .edits
                .iter()
                .enumerate()
                .filter(|(oi, _)| !detection.plan.is_suppressed(ci, *oi))
                .filter_map(|(_, op)| match op {
                    EditOperation::NodeRemoved { id } => Some(id),
                    _ => None,
                })
                .collect();

            let mut summary = ContributionSummary {
                mod_id: contribution.mod_id.clone(),
                priority: contribution.priority,
                applied: 0,
                skipped: 0,
            };
            for (oi, op) in contribution.edits.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    info!(mod_id = %contribution.mod_id, "merge cancelled");
                    return Ok(MergeOutcome::Aborted);
                }
                if detection.plan.is_suppressed(ci, oi) {
                    debug!(mod_id = %contribution.mod_id, edit = %op, "skipping suppressed edit");
                    summary.skipped += 1;
                    continue;
                }
                fold.apply(contribution, op, &removals)?;
                summary.applied += 1;
            }
            debug!(
                mod_id = %summary.mod_id,
                applied = summary.applied,
                skipped = summary.skipped,
                "contribution folded"
            );
            summaries.push(summary);
        }
        if self.cancel.is_cancelled() {
            return Ok(MergeOutcome::Aborted);
        }

        let Fold {
            mut graph,
            mut redirects,
            ..
        } = fold;
        graph.prune_edges();
        graph
            .check_integrity()
            .map_err(|e| MergeError::UnresolvedReference(e.to_string()))?;

        for record in &mut report.records {
            let Target::Node { id } = &record.target else {
                continue;
            };
            match &mut record.resolution {
                Resolution::DeletionApplied { redirects: log, .. } => {
                    *log = redirects.remove(id).unwrap_or_default();
                }
                Resolution::DeletionSuppressed { reattached_to, .. } => {
                    *reattached_to = reattach(base, &mut graph, id);
                }
                _ => {}
            }
        }

        report.orphans = graph.orphans();
        if !report.orphans.is_empty() {
            let names: Vec<String> = report.orphans.iter().map(ToString::to_string).collect();
            warn!(orphans = %names.join(", "), "merged graph has unreachable nodes");
            if self.options.fail_on_orphans {
                return Err(MergeError::UnresolvedReference(format!(
                    "nodes unreachable from any root: {}",
                    names.join(", ")
                )));
            }
        }

        info!(
            resource = %graph.resource_id(),
            nodes = graph.len(),
            conflicts = report.records.len(),
            "merge complete"
        );
        Ok(MergeOutcome::Merged(MergeResult {
            graph,
            report,
            summaries,
        }))
    }
}

/// Reject duplicate mods and shared priority ranks.
fn validate(contributions: &[ModContribution]) -> Result<(), MergeError> {
    let mut ids: BTreeSet<&ModId> = BTreeSet::new();
    let mut ranks: BTreeMap<u32, &ModId> = BTreeMap::new();
    for contribution in contributions {
        if !ids.insert(&contribution.mod_id) {
            return Err(MergeError::DuplicateContribution(contribution.mod_id.to_string()));
        }
        if let Some(first) = ranks.insert(contribution.priority, &contribution.mod_id) {
            return Err(MergeError::PriorityCycle {
                priority: contribution.priority,
                first: first.to_string(),
                second: contribution.mod_id.to_string(),
            });
        }
    }
    Ok(())
}

/// Link a node kept against a deletion back under its nearest baseline
/// ancestor that is still reachable, when the deleting mods removed every
/// path to it.
fn reattach(base: &Graph, graph: &mut Graph, kept: &NodeId) -> Option<NodeId> {
    if !graph.contains(kept) {
        return None;
    }
    let reachable = graph.reachable();
    if reachable.contains(kept) {
        return None;
    }

    let mut seen = BTreeSet::from([kept.clone()]);
    let mut queue = VecDeque::from([kept.clone()]);
    while let Some(id) = queue.pop_front() {
        for (source, _) in base.incoming(&id) {
            if !seen.insert(source.clone()) {
                continue;
            }
            if !reachable.contains(&source) {
                queue.push_back(source);
                continue;
            }
            let guard = if &id == kept {
                base.edge(&source, kept).and_then(|e| e.guard.clone())
            } else {
                None
            };
            graph.add_edge(Edge {
                source: source.clone(),
                target: kept.clone(),
                guard,
            });
            info!(node = %kept, parent = %source, "reattached node kept against deletion");
            return Some(source);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Fold
// ---------------------------------------------------------------------------

struct Fold<'a> {
    base: &'a Graph,
    graph: Graph,
    /// Priority of the contribution that added each edge.
    edge_origin: HashMap<(NodeId, NodeId), u32>,
    /// Priority of the contribution that added each root.
    root_origin: HashMap<NodeId, u32>,
    redirects: BTreeMap<NodeId, Vec<Redirect>>,
}

impl<'a> Fold<'a> {
    fn new(base: &'a Graph) -> Self {
        Self {
            base,
            graph: base.clone(),
            edge_origin: HashMap::new(),
            root_origin: HashMap::new(),
            redirects: BTreeMap::new(),
        }
    }

    fn require(&self, id: &NodeId, context: &str) -> Result<(), MergeError> {
        if self.graph.contains(id) {
            Ok(())
        } else {
            Err(MergeError::UnresolvedReference(format!(
                "{} references missing node {}",
                context, id
            )))
        }
    }

    /// Rank for a new entry: after everything from the baseline or from
    /// higher-or-equal priorities, before the additions of lower ones.
    fn insertion_point<'k>(
        priority: u32,
        existing: impl Iterator<Item = Option<&'k u32>>,
    ) -> Option<usize> {
        existing
            .enumerate()
            .find(|(_, origin)| matches!(origin, Some(p) if **p < priority))
            .map(|(i, _)| i)
    }

    fn apply(
        &mut self,
        contribution: &ModContribution,
        op: &EditOperation,
        removals: &BTreeSet<&NodeId>,
    ) -> Result<(), MergeError> {
        let priority = contribution.priority;
        debug!(mod_id = %contribution.mod_id, edit = %op, "applying edit");
        match op {
            EditOperation::NodeAdded { node } => {
                self.graph.insert_node(node.clone());
                self.graph
                    .set_attribution(node.id.clone(), contribution.mod_id.clone());
            }
            EditOperation::NodeRemoved { id } => {
                if !self.graph.contains(id) {
                    return Ok(());
                }
                self.redirect_incoming(id, removals);
                self.graph.remove_node(id);
            }
            EditOperation::NodeFieldChanged { id, field, new, .. } => {
                let node = self.graph.node_mut(id).ok_or_else(|| {
                    MergeError::UnresolvedReference(format!("field {} of missing node {}", field, id))
                })?;
                node.set_field(field, new.clone())?;
                self.graph
                    .set_attribution(id.clone(), contribution.mod_id.clone());
            }
            EditOperation::EdgeAdded { edge } => {
                self.require(&edge.source, "edge source")?;
                self.require(&edge.target, "edge target")?;
                let key = (edge.source.clone(), edge.target.clone());
                if let Some(list) = self.graph.edges_mut(&edge.source) {
                    if let Some(existing) = list.iter_mut().find(|e| e.target == edge.target) {
                        // Folding ascends, so the later writer outranks the earlier one.
                        existing.guard = edge.guard.clone();
                        self.edge_origin.insert(key, priority);
                        return Ok(());
                    }
                }
                let origins = self
                    .graph
                    .edges_from(&edge.source)
                    .iter()
                    .map(|e| self.edge_origin.get(&(e.source.clone(), e.target.clone())));
                let at = Self::insertion_point(priority, origins)
                    .unwrap_or_else(|| self.graph.edges_from(&edge.source).len());
                self.graph.insert_edge(at, edge.clone());
                self.edge_origin.insert(key, priority);
            }
            EditOperation::EdgeRemoved { source, target } => {
                self.graph.remove_edge(source, target);
                self.edge_origin.remove(&(source.clone(), target.clone()));
            }
            EditOperation::EdgeGuardChanged {
                source, target, new, ..
            } => {
                let edge = self
                    .graph
                    .edges_mut(source)
                    .and_then(|list| list.iter_mut().find(|e| &e.target == target));
                match edge {
                    Some(edge) => edge.guard = new.clone(),
                    None => debug!(%source, %target, "guard change on missing edge ignored"),
                }
            }
            EditOperation::EdgeReordered { source, order } => {
                if let Some(list) = self.graph.edges_mut(source) {
                    apply_order(list, order, |e| &e.target);
                }
            }
            EditOperation::RootAdded { id } => {
                self.require(id, "root")?;
                if self.graph.roots().contains(id) {
                    return Ok(());
                }
                let origins = self
                    .graph
                    .roots()
                    .iter()
                    .map(|r| self.root_origin.get(r));
                let at = Self::insertion_point(priority, origins)
                    .unwrap_or_else(|| self.graph.roots().len());
                self.graph.insert_root_at(at, id.clone());
                self.root_origin.insert(id.clone(), priority);
            }
            EditOperation::RootRemoved { id } => {
                self.graph.remove_root(id);
                self.root_origin.remove(id);
            }
            EditOperation::RootsReordered { order } => {
                apply_order(self.graph.roots_mut(), order, |r| r);
            }
        }
        Ok(())
    }

    /// Nearest node on the baseline first-child chain below `removed` that
    /// still exists in the merged graph.
    fn successor(&self, removed: &NodeId) -> Option<NodeId> {
        let mut visited = BTreeSet::new();
        visited.insert(removed.clone());
        let mut current = self.base.first_child(removed).cloned();
        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                return None;
            }
            if self.graph.contains(&id) {
                return Some(id);
            }
            current = self.base.first_child(&id).cloned();
        }
        None
    }

    /// Point edges into `removed` at its successor, or drop them.
    fn redirect_incoming(&mut self, removed: &NodeId, removals: &BTreeSet<&NodeId>) {
        let successor = self.successor(removed);
        for (source, _) in self.graph.incoming(removed) {
            if &source == removed || removals.contains(&source) {
                continue;
            }
            let Some(list) = self.graph.edges_mut(&source) else {
                continue;
            };
            let Some(pos) = list.iter().position(|e| &e.target == removed) else {
                continue;
            };
            let origin = self.edge_origin.remove(&(source.clone(), removed.clone()));
            let to = match &successor {
                Some(next) if !list.iter().any(|e| &e.target == next) => {
                    list[pos].target = next.clone();
                    if let Some(p) = origin {
                        self.edge_origin.insert((source.clone(), next.clone()), p);
                    }
                    Some(next.clone())
                }
                _ => {
                    list.remove(pos);
                    None
                }
            };
            debug!(%removed, %source, to = ?to, "redirected edge into deleted node");
            self.redirects
                .entry(removed.clone())
                .or_default()
                .push(Redirect { source, to });
        }
    }
}
