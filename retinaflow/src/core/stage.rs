//! Stage specifications and compiled stages.

use super::{Adapter, StageId};
use crate::transformers::Transformer;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Specification for a single stage, before it is added to a graph.
#[derive(Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The transformer the stage runs.
    pub transformer: Arc<dyn Transformer>,
    /// Upstream stages whose outputs this stage may read.
    pub input_steps: Vec<StageId>,
    /// External bundles this stage may read raw fields from.
    pub input_data: Vec<String>,
    /// Input wiring.
    pub adapter: Adapter,
    /// Stages whose fitted transformer state this stage relies on.
    pub state_dependencies: Vec<StageId>,
    /// Whether the transformer has learnable state.
    pub is_trainable: bool,
    /// Whether the runner writes this stage's output to disk.
    pub persist_output: bool,
    /// Whether the runner may reuse a previously written output.
    pub load_persisted_output: bool,
    /// Root directory for persisted artifacts.
    pub experiment_directory: PathBuf,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            name: name.into(),
            transformer,
            input_steps: Vec::new(),
            input_data: Vec::new(),
            adapter: Adapter::new(),
            state_dependencies: Vec::new(),
            is_trainable: false,
            persist_output: false,
            load_persisted_output: false,
            experiment_directory: PathBuf::new(),
        }
    }

    /// Sets the upstream stages.
    #[must_use]
    pub fn with_input_steps(mut self, steps: impl IntoIterator<Item = StageId>) -> Self {
        self.input_steps = steps.into_iter().collect();
        self
    }

    /// Sets the external bundles.
    #[must_use]
    pub fn with_input_data(mut self, bundles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.input_data = bundles.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Declares that this stage relies on the fitted state of `stage`.
    #[must_use]
    pub fn depends_on_state_of(mut self, stage: StageId) -> Self {
        self.state_dependencies.push(stage);
        self
    }

    /// Marks the stage as trainable.
    #[must_use]
    pub fn trainable(mut self) -> Self {
        self.is_trainable = true;
        self
    }

    /// Sets both persistence flags.
    #[must_use]
    pub fn with_persistence(mut self, persist_output: bool, load_persisted_output: bool) -> Self {
        self.persist_output = persist_output;
        self.load_persisted_output = load_persisted_output;
        self
    }

    /// Sets the experiment directory.
    #[must_use]
    pub fn with_experiment_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.experiment_directory = dir.into();
        self
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("transformer", &self.transformer.name())
            .field("input_steps", &self.input_steps)
            .field("input_data", &self.input_data)
            .field("adapter", &self.adapter)
            .field("state_dependencies", &self.state_dependencies)
            .finish_non_exhaustive()
    }
}

/// A validated stage inside a compiled graph.
///
/// Stages are immutable once added; runtime outputs live in the runner.
#[derive(Debug, Clone)]
pub struct Stage {
    id: StageId,
    spec: StageSpec,
}

impl Stage {
    pub(crate) const fn new(id: StageId, spec: StageSpec) -> Self {
        Self { id, spec }
    }

    /// The stage handle.
    #[must_use]
    pub const fn id(&self) -> StageId {
        self.id
    }

    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The transformer.
    #[must_use]
    pub fn transformer(&self) -> &Arc<dyn Transformer> {
        &self.spec.transformer
    }

    /// Upstream data dependencies.
    #[must_use]
    pub fn input_steps(&self) -> &[StageId] {
        &self.spec.input_steps
    }

    /// External bundles this stage may read.
    #[must_use]
    pub fn input_data(&self) -> &[String] {
        &self.spec.input_data
    }

    /// Input wiring.
    #[must_use]
    pub const fn adapter(&self) -> &Adapter {
        &self.spec.adapter
    }

    /// Fitted-state dependencies.
    #[must_use]
    pub fn state_dependencies(&self) -> &[StageId] {
        &self.spec.state_dependencies
    }

    /// Every stage that must finish before this one runs.
    pub fn dependencies(&self) -> impl Iterator<Item = StageId> + '_ {
        self.spec
            .input_steps
            .iter()
            .chain(&self.spec.state_dependencies)
            .copied()
    }

    /// Whether the transformer has learnable state.
    #[must_use]
    pub const fn is_trainable(&self) -> bool {
        self.spec.is_trainable
    }

    /// Whether the output is written to disk.
    #[must_use]
    pub const fn persist_output(&self) -> bool {
        self.spec.persist_output
    }

    /// Whether a previously written output may be reused.
    #[must_use]
    pub const fn load_persisted_output(&self) -> bool {
        self.spec.load_persisted_output
    }

    /// Root directory for persisted artifacts.
    #[must_use]
    pub fn experiment_directory(&self) -> &Path {
        &self.spec.experiment_directory
    }
}
