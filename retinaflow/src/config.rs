//! Pipeline configuration.
//!
//! Each section is handed verbatim to the transformer it configures; keys a
//! section does not model are kept in its `extra` map. Sections are optional
//! in the document so that a missing one is reported by the compiler, naming
//! the section, rather than by the parser.

use crate::errors::{ConfigError, GraphError};
use crate::transformers::{DetectionModel, LabelEncoderParams, LoaderParams, ModelHandle, RetinaParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment settings shared by every stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Root directory for persisted stage artifacts.
    #[serde(default)]
    pub cache_dirpath: Option<PathBuf>,
    /// Unmodelled keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Configuration for the detection pipelines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Environment settings.
    #[serde(default)]
    pub env: EnvConfig,
    /// Model parameters.
    #[serde(default)]
    pub retinanet: Option<RetinaParams>,
    /// Label encoder parameters.
    #[serde(default)]
    pub label_encoder: Option<LabelEncoderParams>,
    /// Loader parameters.
    #[serde(default)]
    pub loader: Option<LoaderParams>,
    /// Backend bound to the model stage at compile time.
    #[serde(skip)]
    pub detection_model: Option<ModelHandle>,
}

impl PipelineConfig {
    /// Creates a configuration with every section at its defaults.
    #[must_use]
    pub fn new(cache_dirpath: impl Into<PathBuf>) -> Self {
        Self {
            env: EnvConfig {
                cache_dirpath: Some(cache_dirpath.into()),
                extra: BTreeMap::new(),
            },
            retinanet: Some(RetinaParams::default()),
            label_encoder: Some(LabelEncoderParams::default()),
            loader: Some(LoaderParams::default()),
            detection_model: None,
        }
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Binds the backend the model stage will use.
    #[must_use]
    pub fn with_detection_model(mut self, model: Arc<dyn DetectionModel>) -> Self {
        self.detection_model = Some(ModelHandle(model));
        self
    }

    /// Returns `env.cache_dirpath`.
    pub fn cache_dirpath(&self) -> Result<&Path, GraphError> {
        self.env
            .cache_dirpath
            .as_deref()
            .ok_or_else(|| missing("env.cache_dirpath"))
    }

    /// Returns the `retinanet` section.
    pub fn retinanet(&self) -> Result<&RetinaParams, GraphError> {
        self.retinanet.as_ref().ok_or_else(|| missing("retinanet"))
    }

    /// Returns the `label_encoder` section.
    pub fn label_encoder(&self) -> Result<&LabelEncoderParams, GraphError> {
        self.label_encoder
            .as_ref()
            .ok_or_else(|| missing("label_encoder"))
    }

    /// Returns the `loader` section.
    pub fn loader(&self) -> Result<&LoaderParams, GraphError> {
        self.loader.as_ref().ok_or_else(|| missing("loader"))
    }
}

fn missing(section: &str) -> GraphError {
    GraphError::MissingConfigSection {
        section: section.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_document() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "env": {"cache_dirpath": "/tmp/x", "seed": 7},
                "retinanet": {"score_threshold": 0.2, "backbone": "resnet50"},
                "label_encoder": {},
                "loader": {"batch_size": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(config.cache_dirpath().unwrap(), Path::new("/tmp/x"));
        assert_eq!(config.env.extra.get("seed"), Some(&serde_json::json!(7)));
        assert!((config.retinanet().unwrap().score_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(
            config.retinanet().unwrap().extra.get("backbone"),
            Some(&serde_json::json!("resnet50"))
        );
        assert_eq!(config.label_encoder().unwrap().colname, "LabelName");
        assert_eq!(config.loader().unwrap().batch_size, 2);
    }

    #[test]
    fn test_missing_section_is_named() {
        let config = PipelineConfig::from_json_str(r#"{"env": {"cache_dirpath": "/tmp/x"}}"#).unwrap();

        let err = config.loader().unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingConfigSection {
                section: "loader".to_string()
            }
        );
        assert!(PipelineConfig::default().cache_dirpath().is_err());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"env": {{"cache_dirpath": "/data"}}}}"#).unwrap();

        let config = PipelineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.cache_dirpath().unwrap(), Path::new("/data"));
    }

    #[test]
    fn test_from_missing_path() {
        let result = PipelineConfig::from_path("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            PipelineConfig::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
