//! Graph execution engine.
//!
//! Runs the stages a graph's terminal needs, each as soon as its data and
//! fitted-state dependencies have completed.

use super::{adapter, PipelineGraph};
use crate::core::{DataBundles, StageId};
use crate::errors::{GraphError, RunError, TransformError};
use crate::events::{
    EventSink, NoOpEventSink, PIPELINE_COMPLETED, STAGE_COMPLETED, STAGE_FAILED, STAGE_REUSED,
    STAGE_STARTED,
};
use crate::transformers::{TransformInputs, TransformOutputs, Transformer};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How trainable stages are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Fit trainable stages and persist their state.
    Fit,
    /// Restore persisted state and transform. A trainable stage without
    /// persisted state fails as not fitted.
    Transform,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fit => "fit",
            Self::Transform => "transform",
        })
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run id.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// How trainable stages were invoked.
    pub mode: RunMode,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// The terminal stage's name.
    pub terminal: String,
    /// The terminal stage's outputs.
    pub output: TransformOutputs,
    /// Outputs of every stage that ran or was reused, by name.
    pub stage_outputs: BTreeMap<String, TransformOutputs>,
    /// Stages whose persisted output was reused.
    pub reused: Vec<String>,
}

impl RunReport {
    /// Returns the outputs of the named stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&TransformOutputs> {
        self.stage_outputs.get(name)
    }
}

/// Where a stage's fitted state is persisted.
#[must_use]
pub fn state_path(experiment_directory: &Path, stage: &str) -> PathBuf {
    experiment_directory
        .join("transformers")
        .join(format!("{stage}.json"))
}

/// Where a stage's output is persisted. `identity` is the stage's wiring
/// hash, see [`PipelineGraph::stage_identity`].
#[must_use]
pub fn output_path(experiment_directory: &Path, stage: &str, identity: &str) -> PathBuf {
    experiment_directory
        .join("outputs")
        .join(format!("{stage}-{identity}.json"))
}

type StageHandle = tokio::task::JoinHandle<Result<StageResult, RunError>>;

/// Everything a spawned stage task needs, owned.
struct StageTask {
    id: StageId,
    name: String,
    transformer: Arc<dyn Transformer>,
    inputs: TransformInputs,
    fit: bool,
    trainable: bool,
    persist_output: bool,
    load_persisted_output: bool,
    state_path: PathBuf,
    output_path: PathBuf,
    sink: Arc<dyn EventSink>,
}

/// What a finished stage task hands back to the scheduler.
struct StageResult {
    id: StageId,
    outputs: TransformOutputs,
    reused: bool,
}

/// Runs compiled graphs.
#[derive(Clone)]
pub struct GraphRunner {
    sink: Arc<dyn EventSink>,
}

impl Default for GraphRunner {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }
}

impl fmt::Debug for GraphRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphRunner").finish_non_exhaustive()
    }
}

impl GraphRunner {
    /// Creates a runner reporting to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Runs every stage the terminal needs.
    ///
    /// Independent stages run concurrently. Each transformer is invoked at
    /// most once. The first failure stops scheduling, aborts the stages
    /// still running and is returned once they have stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if an input cannot be resolved, a transformer
    /// fails, or an artifact cannot be written.
    pub async fn run(
        &self,
        graph: &PipelineGraph,
        bundles: &DataBundles,
        mode: RunMode,
    ) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let required = graph.execution_order();
        let required_set: BTreeSet<StageId> = required.iter().copied().collect();

        info!(
            pipeline = graph.name(),
            %run_id,
            %mode,
            stages = required.len(),
            "Starting run"
        );

        let mut pending: BTreeMap<StageId, usize> = required
            .iter()
            .filter_map(|&id| graph.stage(id))
            .map(|stage| {
                let deps: BTreeSet<StageId> = stage
                    .dependencies()
                    .filter(|dep| required_set.contains(dep))
                    .collect();
                (stage.id(), deps.len())
            })
            .collect();

        let mut completed: BTreeMap<StageId, TransformOutputs> = BTreeMap::new();
        let mut reused = Vec::new();
        let mut active: FuturesUnordered<StageHandle> = FuturesUnordered::new();

        let ready: Vec<StageId> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();
        for id in ready {
            pending.remove(&id);
            match self.spawn_stage(graph, id, bundles, &completed, mode) {
                Ok(handle) => active.push(handle),
                Err(e) => return Err(abort_active(active, e).await),
            }
        }

        while let Some(joined) = active.next().await {
            let result = match joined.map_err(|e| RunError::Join(e.to_string())) {
                Ok(Ok(result)) => result,
                Ok(Err(e)) | Err(e) => return Err(abort_active(active, e).await),
            };
            if result.reused {
                reused.push(graph.stage(result.id).map(|s| s.name().to_string()).unwrap_or_default());
            }
            completed.insert(result.id, result.outputs);

            let unblocked: Vec<StageId> = pending
                .iter_mut()
                .filter_map(|(&child, count)| {
                    let stage = graph.stage(child)?;
                    let distinct: BTreeSet<StageId> = stage.dependencies().collect();
                    if distinct.contains(&result.id) {
                        *count = count.saturating_sub(1);
                    }
                    (*count == 0).then_some(child)
                })
                .collect();
            for id in unblocked {
                pending.remove(&id);
                match self.spawn_stage(graph, id, bundles, &completed, mode) {
                    Ok(handle) => active.push(handle),
                    Err(e) => return Err(abort_active(active, e).await),
                }
            }
        }

        let terminal = graph.terminal();
        let output = completed.get(&terminal.id()).cloned().unwrap_or_default();
        let stage_outputs = completed
            .into_iter()
            .filter_map(|(id, outputs)| graph.stage(id).map(|s| (s.name().to_string(), outputs)))
            .collect();
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.sink.try_emit(
            PIPELINE_COMPLETED,
            Some(json!({
                "pipeline": graph.name(),
                "run_id": run_id,
                "mode": mode,
                "reused": reused,
                "duration_ms": duration_ms,
            })),
        );
        info!(
            pipeline = graph.name(),
            %run_id,
            reused = reused.len(),
            duration_ms,
            "Run completed"
        );

        Ok(RunReport {
            run_id,
            pipeline: graph.name().to_string(),
            mode,
            started_at,
            finished_at: Utc::now(),
            terminal: terminal.name().to_string(),
            output,
            stage_outputs,
            reused,
        })
    }

    fn spawn_stage(
        &self,
        graph: &PipelineGraph,
        id: StageId,
        bundles: &DataBundles,
        completed: &BTreeMap<StageId, TransformOutputs>,
        mode: RunMode,
    ) -> Result<StageHandle, RunError> {
        let stage = graph
            .stage(id)
            .ok_or_else(|| GraphError::UnknownStage {
                stage: graph.name().to_string(),
                index: id.index(),
            })?;
        let inputs = adapter::resolve(graph, stage, bundles, completed)?;
        let identity = graph.stage_identity(stage);

        let task = StageTask {
            id,
            name: stage.name().to_string(),
            transformer: Arc::clone(stage.transformer()),
            inputs,
            fit: mode == RunMode::Fit,
            trainable: stage.is_trainable(),
            persist_output: stage.persist_output(),
            load_persisted_output: stage.load_persisted_output(),
            state_path: state_path(stage.experiment_directory(), stage.name()),
            output_path: output_path(stage.experiment_directory(), stage.name(), &identity),
            sink: Arc::clone(&self.sink),
        };
        Ok(tokio::spawn(task.run()))
    }
}

impl StageTask {
    async fn run(self) -> Result<StageResult, RunError> {
        self.sink.try_emit(
            STAGE_STARTED,
            Some(json!({"stage": &self.name, "transformer": self.transformer.name()})),
        );
        let start = Instant::now();

        let result = self.execute().await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(done) if done.reused => {
                self.sink
                    .try_emit(STAGE_REUSED, Some(json!({"stage": &self.name})));
            }
            Ok(_) => {
                self.sink.try_emit(
                    STAGE_COMPLETED,
                    Some(json!({"stage": &self.name, "duration_ms": duration_ms})),
                );
            }
            Err(e) => {
                self.sink.try_emit(
                    STAGE_FAILED,
                    Some(json!({
                        "stage": &self.name,
                        "error": e.to_string(),
                        "duration_ms": duration_ms,
                    })),
                );
            }
        }
        result
    }

    async fn execute(&self) -> Result<StageResult, RunError> {
        if self.persist_output && self.load_persisted_output {
            if let Some(outputs) = self.read_persisted_output().await {
                if self.trainable {
                    self.restore_state().await?;
                }
                debug!(stage = %self.name, "Reusing persisted output");
                return Ok(StageResult {
                    id: self.id,
                    outputs,
                    reused: true,
                });
            }
        }

        let outputs = if self.trainable && self.fit {
            let outputs = self
                .transformer
                .fit_transform(&self.inputs)
                .await
                .map_err(|source| self.transform_error(source))?;
            self.persist_state().await?;
            outputs
        } else {
            if self.trainable {
                self.restore_state().await?;
            }
            self.transformer
                .transform(&self.inputs)
                .await
                .map_err(|source| self.transform_error(source))?
        };

        if self.persist_output {
            write_json(&self.output_path, &serde_json::to_value(&outputs)?).await?;
        }

        Ok(StageResult {
            id: self.id,
            outputs,
            reused: false,
        })
    }

    fn transform_error(&self, source: TransformError) -> RunError {
        RunError::Transform {
            stage: self.name.clone(),
            source,
        }
    }

    async fn read_persisted_output(&self) -> Option<TransformOutputs> {
        let bytes = match tokio::fs::read(&self.output_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(stage = %self.name, path = %self.output_path.display(), error = %e, "Failed to read persisted output");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(outputs) => Some(outputs),
            Err(e) => {
                warn!(stage = %self.name, path = %self.output_path.display(), error = %e, "Ignoring corrupt persisted output");
                None
            }
        }
    }

    async fn persist_state(&self) -> Result<(), RunError> {
        if let Some(state) = self.transformer.state() {
            write_json(&self.state_path, &state).await?;
            debug!(stage = %self.name, path = %self.state_path.display(), "Persisted fitted state");
        }
        Ok(())
    }

    async fn restore_state(&self) -> Result<(), RunError> {
        let bytes = match tokio::fs::read(&self.state_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(stage = %self.name, path = %self.state_path.display(), "No fitted state persisted");
                return Err(self.transform_error(TransformError::NotFitted {
                    transformer: self.transformer.name().to_string(),
                }));
            }
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&bytes)?;
        self.transformer
            .load_state(state)
            .map_err(|source| self.transform_error(source))?;
        debug!(stage = %self.name, "Restored fitted state");
        Ok(())
    }
}

/// Aborts every stage still running and waits for them to stop, so no
/// artifact is written after the run has failed.
async fn abort_active(mut active: FuturesUnordered<StageHandle>, error: RunError) -> RunError {
    for handle in active.iter() {
        handle.abort();
    }
    let mut aborted = 0_usize;
    while let Some(joined) = active.next().await {
        if matches!(joined, Err(ref e) if e.is_cancelled()) {
            aborted += 1;
        }
    }
    if aborted > 0 {
        debug!(aborted, error = %error, "Aborted running stages after failure");
    }
    error
}

async fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), RunError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(value)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths() {
        let dir = Path::new("/tmp/exp");
        assert_eq!(
            state_path(dir, "label_encoder"),
            PathBuf::from("/tmp/exp/transformers/label_encoder.json")
        );
        assert_eq!(
            output_path(dir, "decoder", "ab12"),
            PathBuf::from("/tmp/exp/outputs/decoder-ab12.json")
        );
    }

    #[test]
    fn test_run_mode_display() {
        assert_eq!(RunMode::Fit.to_string(), "fit");
        assert_eq!(RunMode::Transform.to_string(), "transform");
        assert_eq!(serde_json::to_value(RunMode::Fit).unwrap(), json!("fit"));
    }
}
