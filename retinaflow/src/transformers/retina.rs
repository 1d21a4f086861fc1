//! RetinaNet model stage and its pluggable backend.

use super::{InputSpec, TransformInputs, TransformOutputs, Transformer};
use crate::errors::TransformError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Construction parameters for [`Retina`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetinaParams {
    /// Detections scoring below this are dropped by the decoder.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// Parameters forwarded verbatim to the backend.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const fn default_score_threshold() -> f64 {
    0.05
}

impl Default for RetinaParams {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            extra: BTreeMap::new(),
        }
    }
}

/// The network behind the model stage.
///
/// Predictions are one entry per image, each an object with `boxes`
/// (`[x1, y1, x2, y2]` in network input pixels), `scores` and `labels`.
#[cfg_attr(test, mockall::automock)]
pub trait DetectionModel: Send + Sync {
    /// Trains on `datagen` and returns the fitted weights descriptor.
    ///
    /// `validation_datagen` is `Value::Null` when no validation split exists.
    fn fit(&self, datagen: &Value, validation_datagen: &Value) -> Result<Value, String>;

    /// Restores weights written by [`DetectionModel::fit`].
    fn load(&self, state: &Value) -> Result<(), String>;

    /// Predicts on every image of `datagen`.
    fn predict(&self, datagen: &Value) -> Result<Value, String>;
}

/// Shared handle to a [`DetectionModel`].
#[derive(Clone)]
pub struct ModelHandle(pub Arc<dyn DetectionModel>);

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModelHandle(..)")
    }
}

/// The RetinaNet model stage.
///
/// Fitting trains the bound backend; transforming asks it for predictions
/// and requires weights that were fitted or loaded first.
pub struct Retina {
    params: RetinaParams,
    train_mode: bool,
    backend: Option<ModelHandle>,
    weights: RwLock<Option<Value>>,
}

impl Retina {
    const NAME: &'static str = "Retina";

    /// Creates a model stage with no backend bound.
    #[must_use]
    pub fn new(params: RetinaParams, train_mode: bool) -> Self {
        Self {
            params,
            train_mode,
            backend: None,
            weights: RwLock::new(None),
        }
    }

    /// Binds a backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Option<ModelHandle>) -> Self {
        self.backend = backend;
        self
    }

    /// Whether the stage was built for training.
    #[must_use]
    pub const fn train_mode(&self) -> bool {
        self.train_mode
    }

    fn backend(&self) -> Result<&dyn DetectionModel, TransformError> {
        self.backend
            .as_ref()
            .map(|handle| handle.0.as_ref())
            .ok_or_else(|| TransformError::BackendUnavailable {
                transformer: Self::NAME.to_string(),
            })
    }

    fn backend_error(message: String) -> TransformError {
        TransformError::Backend {
            transformer: Self::NAME.to_string(),
            message,
        }
    }
}

impl fmt::Debug for Retina {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retina")
            .field("params", &self.params)
            .field("train_mode", &self.train_mode)
            .field("has_backend", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transformer for Retina {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::required("datagen"),
            InputSpec::optional("validation_datagen"),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        vec!["predictions".to_string()]
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        let backend = self.backend()?;
        if self.weights.read().is_none() {
            return Err(TransformError::NotFitted {
                transformer: Self::NAME.to_string(),
            });
        }
        let predictions = backend
            .predict(inputs.require("datagen")?)
            .map_err(Self::backend_error)?;
        Ok(TransformOutputs::from([("predictions".to_string(), predictions)]))
    }

    async fn fit_transform(
        &self,
        inputs: &TransformInputs,
    ) -> Result<TransformOutputs, TransformError> {
        let backend = self.backend()?;
        let null = Value::Null;
        let validation = inputs.get("validation_datagen").unwrap_or(&null);
        let weights = backend
            .fit(inputs.require("datagen")?, validation)
            .map_err(Self::backend_error)?;
        tracing::info!(train_mode = self.train_mode, "Fitted detection model");
        *self.weights.write() = Some(weights);

        // Training yields the fitted model, not predictions.
        Ok(TransformOutputs::from([("predictions".to_string(), Value::Null)]))
    }

    fn state(&self) -> Option<Value> {
        self.weights.read().clone()
    }

    fn load_state(&self, state: Value) -> Result<(), TransformError> {
        self.backend()?
            .load(&state)
            .map_err(|reason| TransformError::State {
                transformer: Self::NAME.to_string(),
                reason,
            })?;
        *self.weights.write() = Some(state);
        Ok(())
    }

    fn params(&self) -> Value {
        json!({"train_mode": self.train_mode, "params": self.params})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;

    fn inputs() -> TransformInputs {
        TransformInputs::new("Retina")
            .with("datagen", json!({"images": [{"id": "a"}]}))
            .with("validation_datagen", json!({"images": [{"id": "b"}]}))
    }

    #[tokio::test]
    async fn test_without_backend_fails() {
        let retina = Retina::new(RetinaParams::default(), false);
        let result = retina.transform(&inputs()).await;
        assert!(matches!(result, Err(TransformError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_fit_stores_backend_weights() {
        let mut model = MockDetectionModel::new();
        model
            .expect_fit()
            .with(always(), always())
            .times(1)
            .returning(|_, validation| {
                assert!(!validation.is_null());
                Ok(json!({"checkpoint": "epoch-1"}))
            });

        let retina = Retina::new(RetinaParams::default(), true)
            .with_backend(Some(ModelHandle(Arc::new(model))));
        let out = retina.fit_transform(&inputs()).await.unwrap();

        assert_eq!(out["predictions"], Value::Null);
        assert_eq!(retina.state(), Some(json!({"checkpoint": "epoch-1"})));
    }

    #[tokio::test]
    async fn test_transform_without_weights_fails() {
        let mut model = MockDetectionModel::new();
        model.expect_predict().never();

        let retina = Retina::new(RetinaParams::default(), false)
            .with_backend(Some(ModelHandle(Arc::new(model))));
        let result = retina.transform(&inputs()).await;
        assert!(matches!(result, Err(TransformError::NotFitted { .. })));
    }

    #[tokio::test]
    async fn test_transform_returns_backend_predictions() {
        let mut model = MockDetectionModel::new();
        model.expect_load().times(1).returning(|_| Ok(()));
        model
            .expect_predict()
            .times(1)
            .returning(|_| Ok(json!([{"boxes": [], "scores": [], "labels": []}])));

        let retina = Retina::new(RetinaParams::default(), false)
            .with_backend(Some(ModelHandle(Arc::new(model))));
        retina.load_state(json!({"checkpoint": "x"})).unwrap();
        let out = retina.transform(&inputs()).await.unwrap();
        assert_eq!(out["predictions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_propagated() {
        let mut model = MockDetectionModel::new();
        model.expect_load().returning(|_| Ok(()));
        model
            .expect_predict()
            .returning(|_| Err("out of memory".to_string()));

        let retina = Retina::new(RetinaParams::default(), false)
            .with_backend(Some(ModelHandle(Arc::new(model))));
        retina.load_state(json!({"checkpoint": "x"})).unwrap();
        let result = retina.transform(&inputs()).await;
        assert!(matches!(
            result,
            Err(TransformError::Backend { ref message, .. }) if message == "out of memory"
        ));
    }

    #[test]
    fn test_load_state_forwards_to_backend() {
        let mut model = MockDetectionModel::new();
        model.expect_load().times(1).returning(|_| Ok(()));

        let retina = Retina::new(RetinaParams::default(), false)
            .with_backend(Some(ModelHandle(Arc::new(model))));
        retina.load_state(json!({"checkpoint": "x"})).unwrap();
        assert_eq!(retina.state(), Some(json!({"checkpoint": "x"})));
    }
}
