//! Named pipeline factories.

use super::retinanet::{retinanet_inference, retinanet_train, RETINANET};
use super::PipelineGraph;
use crate::config::PipelineConfig;
use crate::core::Mode;
use crate::errors::GraphError;
use std::collections::BTreeMap;

/// Compiles a pipeline graph from configuration.
pub type PipelineFactory = fn(&PipelineConfig) -> Result<PipelineGraph, GraphError>;

/// Resolves `(pipeline name, mode)` pairs to factories.
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    factories: BTreeMap<(String, Mode), PipelineFactory>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registers a factory, replacing any previous one for the same key.
    pub fn register(&mut self, name: impl Into<String>, mode: Mode, factory: PipelineFactory) {
        self.factories.insert((name.into(), mode), factory);
    }

    /// Returns the factory for `name` in `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownPipeline`] if nothing is registered.
    pub fn lookup(&self, name: &str, mode: Mode) -> Result<PipelineFactory, GraphError> {
        self.factories
            .get(&(name.to_string(), mode))
            .copied()
            .ok_or_else(|| GraphError::UnknownPipeline {
                name: name.to_string(),
                mode: mode.to_string(),
            })
    }

    /// Looks up and runs a factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is unknown or fails to compile.
    pub fn compile(
        &self,
        name: &str,
        mode: Mode,
        config: &PipelineConfig,
    ) -> Result<PipelineGraph, GraphError> {
        self.lookup(name, mode)?(config)
    }

    /// Like [`PipelineRegistry::compile`], with the mode given by its
    /// registry key (`"train"` or `"inference"`).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidMode`] for an unknown mode key.
    pub fn compile_str(
        &self,
        name: &str,
        mode: &str,
        config: &PipelineConfig,
    ) -> Result<PipelineGraph, GraphError> {
        self.compile(name, mode.parse()?, config)
    }

    /// Returns the registered `(name, mode)` keys.
    pub fn keys(&self) -> impl Iterator<Item = (&str, Mode)> {
        self.factories.keys().map(|(name, mode)| (name.as_str(), *mode))
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(RETINANET, Mode::Train, retinanet_train);
        registry.register(RETINANET, Mode::Inference, retinanet_inference);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_keys() {
        let registry = PipelineRegistry::default();
        let keys: Vec<_> = registry.keys().collect();
        assert_eq!(keys, vec![("retinanet", Mode::Train), ("retinanet", Mode::Inference)]);
    }

    #[test]
    fn test_unknown_pipeline() {
        let registry = PipelineRegistry::default();
        let err = registry
            .compile("yolo", Mode::Train, &PipelineConfig::new("/tmp/x"))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownPipeline {
                name: "yolo".to_string(),
                mode: "train".to_string()
            }
        );
    }

    #[test]
    fn test_compile_str() {
        let registry = PipelineRegistry::default();
        let config = PipelineConfig::new("/tmp/x");

        let graph = registry.compile_str("retinanet", "inference", &config).unwrap();
        assert_eq!(graph.terminal().name(), "output");

        let err = registry.compile_str("retinanet", "serve", &config).unwrap_err();
        assert_eq!(err, GraphError::InvalidMode("serve".to_string()));
    }

    #[test]
    fn test_register_custom_factory() {
        fn train_only(config: &PipelineConfig) -> Result<PipelineGraph, GraphError> {
            retinanet_train(config)
        }

        let mut registry = PipelineRegistry::empty();
        registry.register("custom", Mode::Train, train_only);

        assert!(registry.lookup("custom", Mode::Train).is_ok());
        assert!(registry.lookup("custom", Mode::Inference).is_err());
    }
}
