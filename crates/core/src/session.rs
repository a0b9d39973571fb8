//! Merge session: the pipeline from resources to a merged graph.
//!
//! A [`MergeSession`] builds the baseline, builds and diffs every mod on the
//! blocking pool (bounded by `merge.max_parallel_diffs`), excludes mods whose
//! resources are rejected, and folds the rest with the [`MergeEngine`].
//!
//! Cancellation is checked between per-mod tasks and between fold steps.
//! An aborted session returns [`SessionOutcome::Aborted`] and no partial
//! result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{info, warn};

use crate::config::MergeConfig;
use crate::conflict::ConflictReport;
use crate::diff::ModContribution;
use crate::errors::{ResourceError, SessionError};
use crate::graph::{Graph, ModId};
use crate::merge::{CancelFlag, ContributionSummary, MergeEngine, MergeOutcome};
use crate::resource::{DialogIndex, DialogResource, GraphBuilder};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Where a resource comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSource {
    File(PathBuf),
    Text(String),
}

impl ResourceSource {
    fn load(&self) -> Result<DialogResource, ResourceError> {
        match self {
            Self::File(path) => DialogResource::load_from_file(path),
            Self::Text(text) => DialogResource::from_json_str(text),
        }
    }
}

impl std::fmt::Display for ResourceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Text(_) => write!(f, "<inline>"),
        }
    }
}

/// One mod to merge.
#[derive(Debug, Clone)]
pub struct ModInput {
    pub id: ModId,
    pub priority: u32,
    pub source: ResourceSource,
}

impl ModInput {
    pub fn new(id: impl Into<ModId>, priority: u32, source: ResourceSource) -> Self {
        Self {
            id: id.into(),
            priority,
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// A mod left out of the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedMod {
    pub mod_id: ModId,
    pub reason: String,
}

/// Everything a completed session produced.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub merged: Graph,
    pub report: ConflictReport,
    pub excluded: Vec<ExcludedMod>,
    pub summaries: Vec<ContributionSummary>,
    /// Human-readable log of what the session did.
    pub worklog: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(SessionResult),
    Aborted,
}

impl SessionOutcome {
    pub fn into_result(self) -> Option<SessionResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Aborted => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Runs the merge pipeline for one dialog resource.
pub struct MergeSession {
    config: MergeConfig,
    builder: GraphBuilder,
    cancel: CancelFlag,
}

impl MergeSession {
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            builder: GraphBuilder::new(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn DialogIndex>) -> Self {
        self.builder = self.builder.with_index(index);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling this session from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Build, diff and merge. Mods are merged in priority order regardless of
    /// their position in `mods`.
    pub async fn run(&self, base: ResourceSource, mods: Vec<ModInput>) -> Result<SessionOutcome, SessionError> {
        let started_at = Utc::now();
        let mut worklog = Vec::new();
        info!(base = %base, mods = mods.len(), "merge session started");

        let builder = self.builder.clone().with_scope(0);
        let baseline = task::spawn_blocking(move || {
            base.load()
                .and_then(|r| builder.build(&r))
                .and_then(require_identified)
        })
            .await
            .map_err(|e| SessionError::TaskFailed {
                mod_id: "<baseline>".into(),
                detail: e.to_string(),
            })?
            .map_err(SessionError::Baseline)?;
        worklog.push(format!(
            "baseline {} loaded: {} nodes, {} roots",
            baseline.resource_id(),
            baseline.len(),
            baseline.roots().len()
        ));
        let baseline = Arc::new(baseline);

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_diffs.max(1)));
        let mut tasks = JoinSet::new();
        let mut task_mods: HashMap<task::Id, ModId> = HashMap::new();
        let total = mods.len();
        for (position, input) in mods.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                tasks.abort_all();
                info!("merge session cancelled while scheduling diffs");
                return Ok(SessionOutcome::Aborted);
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| SessionError::TaskFailed {
                    mod_id: input.id.to_string(),
                    detail: e.to_string(),
                })?;
            let base = Arc::clone(&baseline);
            let builder = self.builder.clone().with_scope(position as u32 + 1);
            let mod_id = input.id.clone();
            let handle = tasks.spawn_blocking(move || {
                let _permit = permit;
                let prepared = prepare(&builder, &base, &input);
                (position, input, prepared)
            });
            task_mods.insert(handle.id(), mod_id);
        }

        let mut slots: Vec<Option<ModContribution>> = vec![None; total];
        let mut excluded = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if self.cancel.is_cancelled() {
                tasks.abort_all();
                info!("merge session cancelled while collecting diffs");
                return Ok(SessionOutcome::Aborted);
            }
            let (position, input, prepared) = joined.map_err(|e| task_failure(&task_mods, e))?;
            match prepared {
                Ok(contribution) => {
                    worklog.push(format!(
                        "mod {} (priority {}): {} edit(s) against baseline",
                        input.id,
                        input.priority,
                        contribution.edits.len()
                    ));
                    slots[position] = Some(contribution);
                }
                Err(e) => {
                    warn!(mod_id = %input.id, source = %input.source, error = %e, "excluding mod");
                    worklog.push(format!("mod {} excluded: {}", input.id, e));
                    excluded.push(ExcludedMod {
                        mod_id: input.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        excluded.sort_by(|a, b| a.mod_id.cmp(&b.mod_id));
        let contributions: Vec<ModContribution> = slots.into_iter().flatten().collect();

        let engine = MergeEngine::new(self.config.options()).with_cancel(self.cancel.clone());
        let result = match engine.merge(&baseline, &contributions)? {
            MergeOutcome::Merged(result) => result,
            MergeOutcome::Aborted => return Ok(SessionOutcome::Aborted),
        };

        for summary in &result.summaries {
            worklog.push(format!(
                "mod {} (priority {}): applied {}, skipped {}",
                summary.mod_id, summary.priority, summary.applied, summary.skipped
            ));
        }
        worklog.push(format!(
            "{} conflict(s), {} compatible addition(s), {} orphan(s)",
            result.report.records.len(),
            result.report.compatible.len(),
            result.report.orphans.len()
        ));

        let completed_at = Utc::now();
        info!(
            merged = contributions.len(),
            excluded = excluded.len(),
            conflicts = result.report.records.len(),
            "merge session complete"
        );
        Ok(SessionOutcome::Completed(SessionResult {
            merged: result.graph,
            report: result.report,
            excluded,
            summaries: result.summaries,
            worklog,
            started_at,
            completed_at,
        }))
    }
}

/// Name the mod whose diff task panicked or was cancelled.
fn task_failure(task_mods: &HashMap<task::Id, ModId>, err: JoinError) -> SessionError {
    let mod_id = task_mods
        .get(&err.id())
        .map_or_else(|| "<unknown>".to_string(), ToString::to_string);
    SessionError::TaskFailed {
        mod_id,
        detail: err.to_string(),
    }
}

/// Mods can only refer to baseline nodes by uuid, so every baseline node
/// must carry one.
fn require_identified(graph: Graph) -> Result<Graph, ResourceError> {
    if let Some(id) = graph.node_ids().find(|id| id.is_local()).cloned() {
        return Err(ResourceError::Parse(format!(
            "baseline node {} has no uuid",
            id
        )));
    }
    Ok(graph)
}

/// Load, build and diff one mod.
fn prepare(builder: &GraphBuilder, base: &Graph, input: &ModInput) -> Result<ModContribution, ResourceError> {
    let resource = input.source.load()?;
    if resource.uuid != base.resource_id() {
        return Err(ResourceError::ResourceMismatch {
            expected: base.resource_id().to_string(),
            found: resource.uuid,
        });
    }
    let modified = builder.build(&resource)?;
    Ok(ModContribution::from_graphs(
        input.id.clone(),
        input.priority,
        base,
        &modified,
    ))
}
