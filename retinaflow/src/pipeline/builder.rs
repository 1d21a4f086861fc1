//! Graph builder with wiring validation.

use super::PipelineGraph;
use crate::core::{next_arena_token, BundleCatalog, Source, Stage, StageId, StageSpec};
use crate::errors::GraphError;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use tracing::debug;

#[allow(clippy::expect_used)]
fn stage_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("stage name pattern is valid"))
}

/// Builds a validated stage graph.
///
/// The builder owns the stage arena and hands out [`StageId`] handles as
/// stages are added. Every stage is checked against the stages already in
/// the arena, so an invalid stage is rejected at the point it is added and
/// no partially wired graph can be finished.
#[derive(Debug)]
pub struct GraphBuilder {
    /// The pipeline name.
    name: String,
    /// Token stamped on every handle this builder issues.
    arena: u64,
    /// Stages in insertion order.
    stages: Vec<Stage>,
    /// Name lookup.
    names: HashMap<String, StageId>,
    /// Bundles the target mode supplies, when known.
    catalog: Option<BundleCatalog>,
}

impl GraphBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arena: next_arena_token(),
            stages: Vec::new(),
            names: HashMap::new(),
            catalog: None,
        }
    }

    /// Validates external sources against `catalog`.
    #[must_use]
    pub fn with_catalog(mut self, catalog: BundleCatalog) -> Self {
        self.catalog = Some(catalog);
        self
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

    /// Returns a stage added to this builder.
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        if id.arena() != self.arena {
            return None;
        }
        self.stages.get(id.index())
    }

    /// Adds a stage and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or taken, a handle does not
    /// belong to this builder, or the adapter is not fully and correctly
    /// wired.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<StageId, GraphError> {
        if !stage_name_pattern().is_match(&spec.name) {
            return Err(GraphError::InvalidStageName { name: spec.name });
        }
        if self.names.contains_key(&spec.name) {
            return Err(GraphError::DuplicateStage { name: spec.name });
        }

        for &dep in spec.input_steps.iter().chain(&spec.state_dependencies) {
            self.resolve(&spec.name, dep)?;
        }

        self.validate_adapter(&spec)?;

        let id = StageId::new(self.arena, self.stages.len());
        debug!(
            pipeline = %self.name,
            stage = %spec.name,
            transformer = spec.transformer.name(),
            inputs = spec.adapter.len(),
            "Added stage"
        );
        self.names.insert(spec.name.clone(), id);
        self.stages.push(Stage::new(id, spec));
        Ok(id)
    }

    /// Finishes the graph with `terminal` as its result stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages or `terminal` does not
    /// belong to it.
    pub fn finish(self, terminal: StageId) -> Result<PipelineGraph, GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::Empty(self.name));
        }
        self.resolve(&self.name, terminal)?;
        Ok(PipelineGraph::new(self.name, self.stages, terminal))
    }

    fn resolve(&self, stage: &str, id: StageId) -> Result<&Stage, GraphError> {
        self.stage(id).ok_or_else(|| GraphError::UnknownStage {
            stage: stage.to_string(),
            index: id.index(),
        })
    }

    /// Every stage reachable from `steps` through input steps.
    fn ancestors(&self, steps: &[StageId]) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<StageId> = steps.to_vec();
        while let Some(id) = stack.pop() {
            if seen.insert(id.index()) {
                if let Some(stage) = self.stage(id) {
                    stack.extend_from_slice(stage.input_steps());
                }
            }
        }
        seen
    }

    fn validate_adapter(&self, spec: &StageSpec) -> Result<(), GraphError> {
        let transformer = spec.transformer.name().to_string();
        let declared = spec.transformer.inputs();

        for input in &declared {
            match spec.adapter.get(&input.name) {
                None if !input.optional => {
                    return Err(GraphError::MissingAdapterInput {
                        stage: spec.name.clone(),
                        transformer,
                        input: input.name.clone(),
                    });
                }
                Some(Source::Absent) if !input.optional => {
                    return Err(GraphError::AbsentRequiredInput {
                        stage: spec.name.clone(),
                        input: input.name.clone(),
                    });
                }
                _ => {}
            }
        }

        let reachable = self.ancestors(&spec.input_steps);
        for (input, source) in spec.adapter.iter() {
            if !declared.iter().any(|d| d.name == input) {
                return Err(GraphError::UnknownAdapterInput {
                    stage: spec.name.clone(),
                    transformer,
                    input: input.to_string(),
                });
            }

            match source {
                Source::External { bundle, field } => {
                    self.validate_external(&spec.name, &spec.input_data, bundle, field)?;
                }
                Source::StageOutput { stage, field } => {
                    let upstream = self.resolve(&spec.name, *stage)?;
                    if !reachable.contains(&stage.index()) {
                        return Err(GraphError::UnreachableStage {
                            stage: spec.name.clone(),
                            input: input.to_string(),
                            source_stage: upstream.name().to_string(),
                        });
                    }
                    let outputs = upstream.transformer().outputs();
                    if !outputs.iter().any(|o| o == field) {
                        return Err(GraphError::UnknownOutputField {
                            stage: spec.name.clone(),
                            source_stage: upstream.name().to_string(),
                            field: field.clone(),
                            available: outputs.join(", "),
                        });
                    }
                }
                Source::Absent => {}
            }
        }
        Ok(())
    }

    fn validate_external(
        &self,
        stage: &str,
        input_data: &[String],
        bundle: &str,
        field: &str,
    ) -> Result<(), GraphError> {
        if !input_data.iter().any(|b| b == bundle) {
            return Err(GraphError::UndeclaredBundle {
                stage: stage.to_string(),
                bundle: bundle.to_string(),
            });
        }
        let Some(catalog) = &self.catalog else {
            return Ok(());
        };
        if !catalog.has_bundle(bundle) {
            return Err(GraphError::UnknownBundle {
                stage: stage.to_string(),
                bundle: bundle.to_string(),
                mode: catalog.mode().to_string(),
            });
        }
        if !catalog.has_field(bundle, field) {
            return Err(GraphError::UnknownBundleField {
                stage: stage.to_string(),
                bundle: bundle.to_string(),
                field: field.to_string(),
            });
        }
        Ok(())
    }
}
