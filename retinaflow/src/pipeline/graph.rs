//! Compiled pipeline graphs and their structural descriptors.

use crate::core::{Source, Stage, StageId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A compiled, immutable stage graph with one terminal stage.
///
/// Stages are stored in insertion order. Every edge points from a later
/// stage to an earlier one, so insertion order is also a valid execution
/// order.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    /// The pipeline name.
    name: String,
    /// Stages in insertion order.
    stages: Vec<Stage>,
    /// The result stage.
    terminal: StageId,
}

impl PipelineGraph {
    pub(crate) fn new(name: String, stages: Vec<Stage>, terminal: StageId) -> Self {
        Self {
            name,
            stages,
            terminal,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns all stages in insertion order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the terminal stage.
    #[must_use]
    pub fn terminal(&self) -> &Stage {
        &self.stages[self.terminal.index()]
    }

    /// Returns a stage by handle.
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(id.index()).filter(|s| s.id() == id)
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name() == name)
    }

    /// Returns the stage names in insertion order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Returns the stages `id` depends on, directly or transitively, through
    /// data or fitted-state edges. `id` itself is included.
    #[must_use]
    pub fn closure(&self, id: StageId) -> BTreeSet<StageId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                if let Some(stage) = self.stage(next) {
                    stack.extend(stage.dependencies());
                }
            }
        }
        seen
    }

    /// Returns true if `ancestor` is reachable from `id` through input steps.
    #[must_use]
    pub fn is_upstream(&self, ancestor: StageId, id: StageId) -> bool {
        let mut stack: Vec<StageId> = self
            .stage(id)
            .map(|s| s.input_steps().to_vec())
            .unwrap_or_default();
        let mut seen = BTreeSet::new();
        while let Some(next) = stack.pop() {
            if next == ancestor {
                return true;
            }
            if seen.insert(next) {
                if let Some(stage) = self.stage(next) {
                    stack.extend_from_slice(stage.input_steps());
                }
            }
        }
        false
    }

    /// Returns the stages the terminal needs, in execution order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<StageId> {
        self.closure(self.terminal).into_iter().collect()
    }

    /// Returns a name-addressed description of the graph's structure.
    #[must_use]
    pub fn descriptor(&self) -> GraphDescriptor {
        GraphDescriptor {
            name: self.name.clone(),
            terminal: self.terminal().name().to_string(),
            stages: self.stages.iter().map(|s| self.describe_stage(s)).collect(),
        }
    }

    /// Returns a stable hash of a stage's wiring and transformer parameters.
    ///
    /// Persisted outputs are keyed by this identity, so any change in how a
    /// stage is wired invalidates its previously written output.
    #[must_use]
    pub fn stage_identity(&self, stage: &Stage) -> String {
        let descriptor = self.describe_stage(stage);
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&descriptor).unwrap_or_default());
        hasher.update(serde_json::to_vec(&stage.transformer().params()).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    fn name_of(&self, id: StageId) -> String {
        self.stage(id)
            .map_or_else(|| id.to_string(), |s| s.name().to_string())
    }

    fn describe_stage(&self, stage: &Stage) -> StageDescriptor {
        StageDescriptor {
            name: stage.name().to_string(),
            transformer: stage.transformer().name().to_string(),
            input_steps: stage.input_steps().iter().map(|&id| self.name_of(id)).collect(),
            input_data: stage.input_data().to_vec(),
            adapter: stage
                .adapter()
                .iter()
                .map(|(input, source)| (input.to_string(), self.describe_source(source)))
                .collect(),
            state_dependencies: stage
                .state_dependencies()
                .iter()
                .map(|&id| self.name_of(id))
                .collect(),
            is_trainable: stage.is_trainable(),
            persist_output: stage.persist_output(),
            load_persisted_output: stage.load_persisted_output(),
            experiment_directory: stage.experiment_directory().to_path_buf(),
        }
    }

    fn describe_source(&self, source: &Source) -> SourceDescriptor {
        match source {
            Source::External { bundle, field } => SourceDescriptor::External {
                bundle: bundle.clone(),
                field: field.clone(),
            },
            Source::StageOutput { stage, field } => SourceDescriptor::StageOutput {
                stage: self.name_of(*stage),
                field: field.clone(),
            },
            Source::Absent => SourceDescriptor::Absent,
        }
    }
}

/// Name-addressed form of a [`Source`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// A raw bundle field.
    External {
        /// The bundle name.
        bundle: String,
        /// The field name.
        field: String,
    },
    /// An upstream stage output.
    StageOutput {
        /// The producing stage's name.
        stage: String,
        /// The output field.
        field: String,
    },
    /// Explicitly not supplied.
    Absent,
}

/// Name-addressed description of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// The stage name.
    pub name: String,
    /// The transformer name.
    pub transformer: String,
    /// Upstream stage names.
    pub input_steps: Vec<String>,
    /// External bundle names.
    pub input_data: Vec<String>,
    /// Input wiring.
    pub adapter: BTreeMap<String, SourceDescriptor>,
    /// Stages whose fitted state this stage relies on.
    pub state_dependencies: Vec<String>,
    /// Trainable flag.
    pub is_trainable: bool,
    /// Output persistence flag.
    pub persist_output: bool,
    /// Output reuse flag.
    pub load_persisted_output: bool,
    /// Artifact root.
    pub experiment_directory: PathBuf,
}

/// Name-addressed description of a whole graph.
///
/// Two compilations of the same pipeline compare equal through their
/// descriptors even though their stage handles differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    /// The pipeline name.
    pub name: String,
    /// The terminal stage's name.
    pub terminal: String,
    /// Stages in insertion order.
    pub stages: Vec<StageDescriptor>,
}

impl GraphDescriptor {
    /// Returns the descriptor of the named stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Adapter, StageSpec};
    use crate::pipeline::GraphBuilder;
    use crate::transformers::IdentityOperation;
    use std::sync::Arc;

    fn chain() -> (PipelineGraph, Vec<StageId>) {
        let mut builder = GraphBuilder::new("chain");
        let a = builder
            .add_stage(
                StageSpec::new("a", Arc::new(IdentityOperation::new(["x"])))
                    .with_input_data(["input"])
                    .with_adapter(Adapter::new().map("x", Source::external("input", "img_ids"))),
            )
            .unwrap();
        let b = builder
            .add_stage(
                StageSpec::new("b", Arc::new(IdentityOperation::new(["x"])))
                    .with_input_steps([a])
                    .with_adapter(Adapter::new().map("x", Source::stage(a, "x"))),
            )
            .unwrap();
        let unused = builder
            .add_stage(StageSpec::new("unused", Arc::new(IdentityOperation::new(Vec::<String>::new()))))
            .unwrap();
        let c = builder
            .add_stage(
                StageSpec::new("c", Arc::new(IdentityOperation::new(["x"])))
                    .with_input_steps([b])
                    .depends_on_state_of(a)
                    .with_adapter(Adapter::new().map("x", Source::stage(b, "x"))),
            )
            .unwrap();
        (builder.finish(c).unwrap(), vec![a, b, unused, c])
    }

    #[test]
    fn test_execution_order_skips_unneeded_stages() {
        let (graph, ids) = chain();
        assert_eq!(graph.execution_order(), vec![ids[0], ids[1], ids[3]]);
    }

    #[test]
    fn test_upstream_follows_input_steps_only() {
        let (graph, ids) = chain();
        assert!(graph.is_upstream(ids[0], ids[3]));
        assert!(!graph.is_upstream(ids[2], ids[3]));
        assert!(!graph.is_upstream(ids[3], ids[0]));
    }

    #[test]
    fn test_descriptor_uses_names() {
        let (graph, _) = chain();
        let descriptor = graph.descriptor();

        assert_eq!(descriptor.terminal, "c");
        let c = descriptor.stage("c").unwrap();
        assert_eq!(c.input_steps, vec!["b".to_string()]);
        assert_eq!(c.state_dependencies, vec!["a".to_string()]);
        assert_eq!(
            c.adapter.get("x"),
            Some(&SourceDescriptor::StageOutput {
                stage: "b".to_string(),
                field: "x".to_string()
            })
        );
    }

    #[test]
    fn test_stage_identity_is_stable_and_distinct() {
        let (first, _) = chain();
        let (second, _) = chain();

        let a1 = first.stage_identity(first.stage_by_name("a").unwrap());
        let a2 = second.stage_identity(second.stage_by_name("a").unwrap());
        let b1 = first.stage_identity(first.stage_by_name("b").unwrap());

        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
        assert_eq!(a1.len(), 64);
    }

    #[test]
    fn test_stage_lookup_rejects_foreign_handle() {
        let (first, ids) = chain();
        let (second, _) = chain();
        assert!(first.stage(ids[0]).is_some());
        assert!(second.stage(ids[0]).is_none());
    }
}
