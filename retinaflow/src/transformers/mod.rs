//! Transformer trait and the detection pipeline's transformers.
//!
//! Transformers are the opaque units of work a stage wraps. The graph only
//! relies on their declared inputs and outputs; what happens inside
//! `transform` is up to the implementation.

mod apply;
mod labels;
mod loader;
mod postprocessing;
mod retina;

pub use apply::{resize_bboxes, ApplyFn, ApplyTransformer};
pub use labels::{LabelDecoder, LabelEncoder, LabelEncoderParams};
pub use loader::{ImageDetectionLoader, LoaderParams};
pub use postprocessing::{DataDecoder, SubmissionProducer};
pub use retina::{DetectionModel, ModelHandle, Retina, RetinaParams};

use crate::errors::TransformError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Named output values of one transformer invocation.
pub type TransformOutputs = BTreeMap<String, serde_json::Value>;

/// A declared transformer input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSpec {
    /// The input name adapters map.
    pub name: String,
    /// Whether the input may be left unmapped or marked absent.
    pub optional: bool,
}

impl InputSpec {
    /// A required input.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    /// An optional input.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// Resolved input values handed to a transformer.
///
/// A `None` value means the input was explicitly absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformInputs {
    transformer: String,
    values: BTreeMap<String, Option<serde_json::Value>>,
}

impl TransformInputs {
    /// Creates empty inputs for `transformer`.
    #[must_use]
    pub fn new(transformer: impl Into<String>) -> Self {
        Self {
            transformer: transformer.into(),
            values: BTreeMap::new(),
        }
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(name.into(), Some(value));
        self
    }

    /// Adds an absent input.
    #[must_use]
    pub fn with_absent(mut self, name: impl Into<String>) -> Self {
        self.values.insert(name.into(), None);
        self
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Option<serde_json::Value>) {
        self.values.insert(name.into(), value);
    }

    /// Returns the value of `name`, or `None` if it is absent or unmapped.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name).and_then(Option::as_ref)
    }

    /// Returns the value of `name` or a [`TransformError::MissingInput`].
    pub fn require(&self, name: &str) -> Result<&serde_json::Value, TransformError> {
        self.get(name)
            .ok_or_else(|| TransformError::missing_input(&self.transformer, name))
    }

    /// Returns true if `name` was explicitly marked absent.
    #[must_use]
    pub fn is_absent(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(None))
    }

    /// Iterates over all inputs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&serde_json::Value>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

/// Trait for the units of computation stages wrap.
#[async_trait]
pub trait Transformer: Send + Sync + Debug {
    /// Returns the transformer name.
    fn name(&self) -> &str;

    /// Declared inputs.
    fn inputs(&self) -> Vec<InputSpec>;

    /// Declared output fields.
    fn outputs(&self) -> Vec<String>;

    /// Computes outputs from already-fitted state.
    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError>;

    /// Fits learnable state, then transforms.
    ///
    /// Stateless transformers keep the default.
    async fn fit_transform(
        &self,
        inputs: &TransformInputs,
    ) -> Result<TransformOutputs, TransformError> {
        self.transform(inputs).await
    }

    /// Serializable fitted state, if the transformer has any.
    fn state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restores fitted state written by [`Transformer::state`].
    fn load_state(&self, _state: serde_json::Value) -> Result<(), TransformError> {
        Ok(())
    }

    /// Construction parameters, used to derive a stage's persistence identity.
    fn params(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Re-exposes its inputs unchanged under the same names.
#[derive(Debug, Clone)]
pub struct IdentityOperation {
    names: Vec<String>,
}

impl IdentityOperation {
    /// Creates an identity over the given input names.
    #[must_use]
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Transformer for IdentityOperation {
    fn name(&self) -> &str {
        "IdentityOperation"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        self.names.iter().map(InputSpec::required).collect()
    }

    fn outputs(&self) -> Vec<String> {
        self.names.clone()
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        self.names
            .iter()
            .map(|name| Ok((name.clone(), inputs.require(name)?.clone())))
            .collect()
    }
}
