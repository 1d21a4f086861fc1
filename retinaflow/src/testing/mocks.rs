//! Test doubles for transformers and the detection backend.

use crate::errors::TransformError;
use crate::transformers::{
    DetectionModel, InputSpec, TransformInputs, TransformOutputs, Transformer,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// A detection backend that predicts one fixed box per image.
///
/// Every prediction is a box covering the top-left quarter of a 512x512
/// input, label 0, score 0.9.
#[derive(Debug, Default)]
pub struct StubDetector {
    fits: Mutex<usize>,
    predictions: Mutex<usize>,
    loaded: Mutex<Vec<Value>>,
}

impl StubDetector {
    /// Creates a detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fit` calls.
    #[must_use]
    pub fn fit_count(&self) -> usize {
        *self.fits.lock()
    }

    /// Number of `predict` calls.
    #[must_use]
    pub fn predict_count(&self) -> usize {
        *self.predictions.lock()
    }

    /// States passed to `load`, in order.
    #[must_use]
    pub fn loaded_states(&self) -> Vec<Value> {
        self.loaded.lock().clone()
    }

    fn images(datagen: &Value) -> Result<&Vec<Value>, String> {
        datagen["images"]
            .as_array()
            .ok_or_else(|| "datagen has no 'images' array".to_string())
    }
}

impl DetectionModel for StubDetector {
    fn fit(&self, datagen: &Value, validation_datagen: &Value) -> Result<Value, String> {
        let train = Self::images(datagen)?.len();
        let valid = Self::images(validation_datagen).map_or(0, Vec::len);
        *self.fits.lock() += 1;
        Ok(json!({"weights": "stub", "train_images": train, "valid_images": valid}))
    }

    fn load(&self, state: &Value) -> Result<(), String> {
        self.loaded.lock().push(state.clone());
        Ok(())
    }

    fn predict(&self, datagen: &Value) -> Result<Value, String> {
        let images = Self::images(datagen)?;
        *self.predictions.lock() += 1;
        Ok(Value::Array(
            images
                .iter()
                .map(|_| json!({"boxes": [[0, 0, 256, 256]], "scores": [0.9], "labels": [0]}))
                .collect(),
        ))
    }
}

/// Wraps a transformer and counts how often it is invoked.
#[derive(Debug)]
pub struct RecordingTransformer {
    inner: Arc<dyn Transformer>,
    transforms: Mutex<usize>,
    fits: Mutex<usize>,
}

impl RecordingTransformer {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Transformer>) -> Self {
        Self {
            inner,
            transforms: Mutex::new(0),
            fits: Mutex::new(0),
        }
    }

    /// Number of `transform` calls.
    #[must_use]
    pub fn transform_count(&self) -> usize {
        *self.transforms.lock()
    }

    /// Number of `fit_transform` calls.
    #[must_use]
    pub fn fit_count(&self) -> usize {
        *self.fits.lock()
    }

    /// Total invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.transform_count() + self.fit_count()
    }
}

#[async_trait]
impl Transformer for RecordingTransformer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inputs(&self) -> Vec<InputSpec> {
        self.inner.inputs()
    }

    fn outputs(&self) -> Vec<String> {
        self.inner.outputs()
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        *self.transforms.lock() += 1;
        self.inner.transform(inputs).await
    }

    async fn fit_transform(
        &self,
        inputs: &TransformInputs,
    ) -> Result<TransformOutputs, TransformError> {
        *self.fits.lock() += 1;
        self.inner.fit_transform(inputs).await
    }

    fn state(&self) -> Option<Value> {
        self.inner.state()
    }

    fn load_state(&self, state: Value) -> Result<(), TransformError> {
        self.inner.load_state(state)
    }

    fn params(&self) -> Value {
        self.inner.params()
    }
}

/// A transformer that always fails with a backend error.
#[derive(Debug, Clone)]
pub struct FailingTransformer {
    inputs: Vec<String>,
    outputs: Vec<String>,
    message: String,
}

impl FailingTransformer {
    /// Creates a transformer declaring the given required inputs and outputs.
    #[must_use]
    pub fn new(
        inputs: impl IntoIterator<Item = impl Into<String>>,
        outputs: impl IntoIterator<Item = impl Into<String>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Transformer for FailingTransformer {
    fn name(&self) -> &str {
        "FailingTransformer"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        self.inputs.iter().map(InputSpec::required).collect()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn transform(&self, _inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        Err(TransformError::Backend {
            transformer: self.name().to_string(),
            message: self.message.clone(),
        })
    }
}

/// Wraps a transformer and sleeps before every invocation.
#[derive(Debug)]
pub struct DelayedTransformer {
    inner: Arc<dyn Transformer>,
    delay: Duration,
}

impl DelayedTransformer {
    /// Wraps `inner`, delaying each call by `delay`.
    #[must_use]
    pub fn new(inner: Arc<dyn Transformer>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl Transformer for DelayedTransformer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inputs(&self) -> Vec<InputSpec> {
        self.inner.inputs()
    }

    fn outputs(&self) -> Vec<String> {
        self.inner.outputs()
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        tokio::time::sleep(self.delay).await;
        self.inner.transform(inputs).await
    }

    fn params(&self) -> Value {
        self.inner.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::IdentityOperation;

    #[test]
    fn test_stub_detector_predicts_per_image() {
        let detector = StubDetector::new();
        let predictions = detector
            .predict(&json!({"images": [{"id": "a"}, {"id": "b"}]}))
            .unwrap();

        assert_eq!(predictions.as_array().unwrap().len(), 2);
        assert_eq!(detector.predict_count(), 1);
        assert!(detector.predict(&json!({})).is_err());
    }

    #[test]
    fn test_stub_detector_fit_without_validation() {
        let detector = StubDetector::new();
        let weights = detector
            .fit(&json!({"images": [{"id": "a"}]}), &Value::Null)
            .unwrap();

        assert_eq!(weights["valid_images"], json!(0));
        assert_eq!(detector.fit_count(), 1);
    }

    #[tokio::test]
    async fn test_recording_transformer_counts() {
        let recording = RecordingTransformer::new(Arc::new(IdentityOperation::new(["x"])));
        let inputs = TransformInputs::new("IdentityOperation").with("x", json!(1));

        recording.transform(&inputs).await.unwrap();
        recording.fit_transform(&inputs).await.unwrap();

        assert_eq!(recording.transform_count(), 1);
        assert_eq!(recording.fit_count(), 1);
        assert_eq!(recording.call_count(), 2);
        assert_eq!(recording.name(), "IdentityOperation");
    }

    #[tokio::test]
    async fn test_failing_transformer() {
        let failing = FailingTransformer::new(["x"], ["y"], "boom");
        let result = failing.transform(&TransformInputs::new("FailingTransformer")).await;
        assert!(matches!(result, Err(TransformError::Backend { ref message, .. }) if message == "boom"));
    }
}
