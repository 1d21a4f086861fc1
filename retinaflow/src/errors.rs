//! Error types for retinaflow.
//!
//! Errors fall into four families:
//! - [`GraphError`]: the wiring of a pipeline is malformed. Raised while a
//!   graph is being compiled; no partial graph is ever returned.
//! - [`RunError`]: the runner could not resolve an input or persist an
//!   artifact, or a transformer failed.
//! - [`TransformError`]: a transformer rejected its inputs or its backend
//!   failed. Propagated unchanged through [`RunError::Transform`].
//! - [`ConfigError`]: configuration could not be read or parsed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Metadata about a wiring error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-001-DUPLICATE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));

        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }

        map
    }
}

/// Errors raised while compiling a pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two stages in one graph share a name.
    #[error("Duplicate stage name '{name}'")]
    DuplicateStage {
        /// The repeated name.
        name: String,
    },

    /// The stage name is empty or contains forbidden characters.
    #[error("Invalid stage name '{name}': names must match [a-z][a-z0-9_]*")]
    InvalidStageName {
        /// The rejected name.
        name: String,
    },

    /// A handle does not belong to the graph being built.
    #[error("Stage '{stage}' references unknown stage handle #{index}")]
    UnknownStage {
        /// The stage holding the reference.
        stage: String,
        /// The arena index that could not be resolved.
        index: usize,
    },

    /// An adapter reads from a stage that is not upstream of it.
    #[error("Stage '{stage}' reads input '{input}' from '{source_stage}', which is not reachable through its input steps")]
    UnreachableStage {
        /// The consuming stage.
        stage: String,
        /// The adapter input name.
        input: String,
        /// The referenced stage.
        source_stage: String,
    },

    /// An adapter reads a field the upstream transformer never produces.
    #[error("Stage '{stage}' reads '{source_stage}.{field}', but '{source_stage}' only produces [{available}]")]
    UnknownOutputField {
        /// The consuming stage.
        stage: String,
        /// The referenced stage.
        source_stage: String,
        /// The missing output field.
        field: String,
        /// Comma separated list of declared outputs.
        available: String,
    },

    /// A required transformer input has no adapter entry.
    #[error("Stage '{stage}' does not map required input '{input}' of transformer '{transformer}'")]
    MissingAdapterInput {
        /// The stage.
        stage: String,
        /// The transformer name.
        transformer: String,
        /// The unmapped input.
        input: String,
    },

    /// The adapter maps an input the transformer does not declare.
    #[error("Stage '{stage}' maps input '{input}', which transformer '{transformer}' does not declare")]
    UnknownAdapterInput {
        /// The stage.
        stage: String,
        /// The transformer name.
        transformer: String,
        /// The undeclared input.
        input: String,
    },

    /// A required input is explicitly marked absent.
    #[error("Stage '{stage}' marks required input '{input}' as absent")]
    AbsentRequiredInput {
        /// The stage.
        stage: String,
        /// The input marked absent.
        input: String,
    },

    /// An adapter reads a bundle the stage did not list in its input data.
    #[error("Stage '{stage}' reads bundle '{bundle}' without declaring it as input data")]
    UndeclaredBundle {
        /// The stage.
        stage: String,
        /// The bundle name.
        bundle: String,
    },

    /// The bundle is not provided in the mode the graph is compiled for.
    #[error("Stage '{stage}' reads bundle '{bundle}', which is not available in {mode} mode")]
    UnknownBundle {
        /// The stage.
        stage: String,
        /// The bundle name.
        bundle: String,
        /// The compilation mode.
        mode: String,
    },

    /// The bundle exists but does not carry the field.
    #[error("Stage '{stage}' reads field '{field}' from bundle '{bundle}', which does not provide it")]
    UnknownBundleField {
        /// The stage.
        stage: String,
        /// The bundle name.
        bundle: String,
        /// The missing field.
        field: String,
    },

    /// A required configuration section is missing.
    #[error("Configuration section '{section}' is missing")]
    MissingConfigSection {
        /// The section path, e.g. `env.cache_dirpath`.
        section: String,
    },

    /// No pipeline is registered under the requested name and mode.
    #[error("No pipeline registered as '{name}' for mode '{mode}'")]
    UnknownPipeline {
        /// The requested pipeline name.
        name: String,
        /// The requested mode.
        mode: String,
    },

    /// The mode string is neither `train` nor `inference`.
    #[error("Invalid pipeline mode '{0}', expected 'train' or 'inference'")]
    InvalidMode(String),

    /// The graph has no stages.
    #[error("Pipeline '{0}' has no stages")]
    Empty(String),
}

impl GraphError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateStage { .. } => "GRAPH-001-DUPLICATE",
            Self::InvalidStageName { .. } => "GRAPH-001-NAME",
            Self::UnknownStage { .. } => "GRAPH-001-UNKNOWN_STAGE",
            Self::UnreachableStage { .. } => "GRAPH-001-UNREACHABLE",
            Self::UnknownOutputField { .. } => "GRAPH-001-OUTPUT_FIELD",
            Self::MissingAdapterInput { .. } => "GRAPH-001-MISSING_INPUT",
            Self::UnknownAdapterInput { .. } => "GRAPH-001-UNKNOWN_INPUT",
            Self::AbsentRequiredInput { .. } => "GRAPH-001-ABSENT_REQUIRED",
            Self::UndeclaredBundle { .. } => "GRAPH-001-UNDECLARED_BUNDLE",
            Self::UnknownBundle { .. } => "GRAPH-001-UNKNOWN_BUNDLE",
            Self::UnknownBundleField { .. } => "GRAPH-001-BUNDLE_FIELD",
            Self::MissingConfigSection { .. } => "GRAPH-001-CONFIG",
            Self::UnknownPipeline { .. } => "GRAPH-001-PIPELINE",
            Self::InvalidMode(_) => "GRAPH-001-MODE",
            Self::Empty(_) => "GRAPH-001-EMPTY",
        }
    }

    /// Returns the stage names involved in the error, if any.
    #[must_use]
    pub fn stages(&self) -> Vec<String> {
        match self {
            Self::DuplicateStage { name } | Self::InvalidStageName { name } => vec![name.clone()],
            Self::UnreachableStage { stage, source_stage, .. }
            | Self::UnknownOutputField { stage, source_stage, .. } => {
                vec![stage.clone(), source_stage.clone()]
            }
            Self::UnknownStage { stage, .. }
            | Self::MissingAdapterInput { stage, .. }
            | Self::UnknownAdapterInput { stage, .. }
            | Self::AbsentRequiredInput { stage, .. }
            | Self::UndeclaredBundle { stage, .. }
            | Self::UnknownBundle { stage, .. }
            | Self::UnknownBundleField { stage, .. } => vec![stage.clone()],
            Self::MissingConfigSection { .. }
            | Self::UnknownPipeline { .. }
            | Self::InvalidMode(_)
            | Self::Empty(_) => Vec::new(),
        }
    }

    /// Builds the diagnostic info for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let info = ContractErrorInfo::new(self.code(), self.to_string());
        let info = match self.fix_hint() {
            Some(hint) => info.with_fix_hint(hint),
            None => info,
        };
        self.stages()
            .into_iter()
            .enumerate()
            .fold(info, |info, (i, stage)| {
                info.with_context_entry(format!("stage.{i}"), stage)
            })
    }

    fn fix_hint(&self) -> Option<&'static str> {
        match self {
            Self::DuplicateStage { .. } => Some("Give every stage in a pipeline a distinct name."),
            Self::UnreachableStage { .. } => {
                Some("Add the referenced stage (or one of its descendants) to the input steps.")
            }
            Self::MissingAdapterInput { .. } => {
                Some("Map the input to a bundle field, an upstream output, or Source::Absent if it is optional.")
            }
            Self::UndeclaredBundle { .. } => Some("List the bundle in the stage's input data."),
            Self::UnknownBundle { .. } => {
                Some("Check which bundles the mode supplies; train and inference differ.")
            }
            Self::MissingConfigSection { .. } => {
                Some("Add the section to the pipeline configuration file.")
            }
            _ => None,
        }
    }
}

/// Errors raised by transformers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// A required input was not supplied.
    #[error("Transformer '{transformer}' requires input '{input}'")]
    MissingInput {
        /// The transformer name.
        transformer: String,
        /// The missing input.
        input: String,
    },

    /// An input had an unexpected shape.
    #[error("Transformer '{transformer}' received invalid '{input}': {reason}")]
    InvalidInput {
        /// The transformer name.
        transformer: String,
        /// The offending input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A transformer needs fitted state that has not been fitted or loaded.
    #[error("Transformer '{transformer}' is not fitted")]
    NotFitted {
        /// The transformer name.
        transformer: String,
    },

    /// The transformer has no backend bound to it.
    #[error("Transformer '{transformer}' has no backend bound")]
    BackendUnavailable {
        /// The transformer name.
        transformer: String,
    },

    /// The backend reported a failure.
    #[error("Backend error in '{transformer}': {message}")]
    Backend {
        /// The transformer name.
        transformer: String,
        /// The backend message.
        message: String,
    },

    /// Persisted state could not be restored.
    #[error("Transformer '{transformer}' could not load state: {reason}")]
    State {
        /// The transformer name.
        transformer: String,
        /// Why the state was rejected.
        reason: String,
    },
}

impl TransformError {
    /// Creates a missing input error.
    #[must_use]
    pub fn missing_input(transformer: impl Into<String>, input: impl Into<String>) -> Self {
        Self::MissingInput {
            transformer: transformer.into(),
            input: input.into(),
        }
    }

    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(
        transformer: impl Into<String>,
        input: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            transformer: transformer.into(),
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while running a compiled graph.
#[derive(Debug, Error)]
pub enum RunError {
    /// The graph itself is malformed.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A bundle referenced by an adapter was not supplied.
    #[error("Stage '{stage}' needs bundle '{bundle}', which was not supplied")]
    MissingBundle {
        /// The consuming stage.
        stage: String,
        /// The missing bundle.
        bundle: String,
    },

    /// A supplied bundle lacks a referenced field.
    #[error("Stage '{stage}' needs field '{field}' of bundle '{bundle}', which was not supplied")]
    MissingBundleField {
        /// The consuming stage.
        stage: String,
        /// The bundle name.
        bundle: String,
        /// The missing field.
        field: String,
    },

    /// An upstream stage finished without producing a referenced field.
    #[error("Stage '{stage}' needs output '{field}' of stage '{source_stage}', which was not produced")]
    MissingStageOutput {
        /// The consuming stage.
        stage: String,
        /// The producing stage.
        source_stage: String,
        /// The missing field.
        field: String,
    },

    /// A transformer failed.
    #[error("Stage '{stage}' failed: {source}")]
    Transform {
        /// The failing stage.
        stage: String,
        /// The transformer error.
        #[source]
        source: TransformError,
    },

    /// A stage task panicked or was aborted.
    #[error("Stage task join error: {0}")]
    Join(String),

    /// Serialization of a persisted artifact failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error while persisting an artifact.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// The file path.
        path: String,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The text is not a valid configuration document.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "loader");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"loader".to_string()));
        assert_eq!(info.to_dict().get("code").unwrap(), "TEST-001");
    }

    #[test]
    fn test_duplicate_stage_error_info() {
        let err = GraphError::DuplicateStage {
            name: "loader".to_string(),
        };
        let info = err.error_info();

        assert_eq!(info.code, "GRAPH-001-DUPLICATE");
        assert!(info.summary.contains("loader"));
        assert!(info.fix_hint.is_some());
        assert_eq!(info.context.get("stage.0"), Some(&"loader".to_string()));
    }

    #[test]
    fn test_unknown_bundle_names_bundle_and_mode() {
        let err = GraphError::UnknownBundle {
            stage: "loader".to_string(),
            bundle: "validation_input".to_string(),
            mode: "inference".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("validation_input"));
        assert!(message.contains("inference"));
    }

    #[test]
    fn test_run_error_wraps_transform_error() {
        let err = RunError::Transform {
            stage: "decoder".to_string(),
            source: TransformError::missing_input("DataDecoder", "predictions"),
        };

        let message = err.to_string();
        assert!(message.contains("decoder"));
        assert!(message.contains("predictions"));
    }

    #[test]
    fn test_graph_error_converts_into_run_error() {
        let err: RunError = GraphError::Empty("p".to_string()).into();
        assert!(matches!(err, RunError::Graph(GraphError::Empty(_))));
    }
}
