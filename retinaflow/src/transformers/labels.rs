//! Label vocabulary encoder and its decoder.

use super::{InputSpec, TransformInputs, TransformOutputs, Transformer};
use crate::errors::TransformError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Construction parameters for [`LabelEncoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoderParams {
    /// Column holding the class identifier in both annotation tables.
    #[serde(default = "default_colname")]
    pub colname: String,
    /// Parameters forwarded verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_colname() -> String {
    "LabelName".to_string()
}

impl Default for LabelEncoderParams {
    fn default() -> Self {
        Self {
            colname: default_colname(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Vocabulary {
    colname: String,
    labels: Vec<String>,
}

/// Fits a class-label vocabulary and tags annotations with label indices.
#[derive(Debug)]
pub struct LabelEncoder {
    params: LabelEncoderParams,
    vocabulary: RwLock<Option<Vec<String>>>,
}

impl LabelEncoder {
    const NAME: &'static str = "LabelEncoder";
    /// Field added to every encoded row.
    pub const ENCODED_FIELD: &'static str = "LabelEncoded";

    /// Creates an unfitted encoder.
    #[must_use]
    pub fn new(params: LabelEncoderParams) -> Self {
        Self {
            params,
            vocabulary: RwLock::new(None),
        }
    }

    /// Returns the fitted vocabulary, index-ordered.
    #[must_use]
    pub fn vocabulary(&self) -> Option<Vec<String>> {
        self.vocabulary.read().clone()
    }

    fn fit(&self, inputs: &TransformInputs) -> Result<(), TransformError> {
        let human_labels = rows(inputs, "annotations_human_labels")?;
        let labels: BTreeSet<String> = human_labels
            .iter()
            .map(|row| self.label_of(row, "annotations_human_labels"))
            .collect::<Result<_, _>>()?;

        tracing::debug!(classes = labels.len(), "Fitted label vocabulary");
        *self.vocabulary.write() = Some(labels.into_iter().collect());
        Ok(())
    }

    fn label_of(&self, row: &Value, input: &str) -> Result<String, TransformError> {
        let label = match row {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get(&self.params.colname).and_then(Value::as_str),
            _ => None,
        };
        label.map(str::to_string).ok_or_else(|| {
            TransformError::invalid_input(
                Self::NAME,
                input,
                format!("row has no string '{}' column", self.params.colname),
            )
        })
    }

    fn encode(
        &self,
        index: &BTreeMap<&str, usize>,
        rows: &[Value],
        input: &str,
    ) -> Result<Value, TransformError> {
        rows.iter()
            .map(|row| {
                let label = self.label_of(row, input)?;
                let code = index.get(label.as_str()).ok_or_else(|| {
                    TransformError::invalid_input(
                        Self::NAME,
                        input,
                        format!("label '{label}' is not in the fitted vocabulary"),
                    )
                })?;
                let mut encoded = match row {
                    Value::Object(map) => map.clone(),
                    _ => {
                        let mut map = serde_json::Map::new();
                        map.insert(self.params.colname.clone(), row.clone());
                        map
                    }
                };
                encoded.insert(Self::ENCODED_FIELD.to_string(), json!(code));
                Ok(Value::Object(encoded))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

fn rows<'a>(inputs: &'a TransformInputs, name: &str) -> Result<&'a Vec<Value>, TransformError> {
    inputs.require(name)?.as_array().ok_or_else(|| {
        TransformError::invalid_input(LabelEncoder::NAME, name, "expected an array of rows")
    })
}

#[async_trait]
impl Transformer for LabelEncoder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::required("annotations"),
            InputSpec::required("annotations_human_labels"),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            "annotations".to_string(),
            "annotations_human_labels".to_string(),
        ]
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        let vocabulary = self.vocabulary().ok_or_else(|| TransformError::NotFitted {
            transformer: Self::NAME.to_string(),
        })?;
        let index: BTreeMap<&str, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        let mut outputs = TransformOutputs::new();
        for name in ["annotations", "annotations_human_labels"] {
            let encoded = self.encode(&index, rows(inputs, name)?, name)?;
            outputs.insert(name.to_string(), encoded);
        }
        Ok(outputs)
    }

    async fn fit_transform(
        &self,
        inputs: &TransformInputs,
    ) -> Result<TransformOutputs, TransformError> {
        self.fit(inputs)?;
        self.transform(inputs).await
    }

    fn state(&self) -> Option<Value> {
        let labels = self.vocabulary()?;
        serde_json::to_value(Vocabulary {
            colname: self.params.colname.clone(),
            labels,
        })
        .ok()
    }

    fn load_state(&self, state: Value) -> Result<(), TransformError> {
        let vocabulary: Vocabulary =
            serde_json::from_value(state).map_err(|e| TransformError::State {
                transformer: Self::NAME.to_string(),
                reason: e.to_string(),
            })?;
        if vocabulary.colname != self.params.colname {
            return Err(TransformError::State {
                transformer: Self::NAME.to_string(),
                reason: format!(
                    "state was fitted on column '{}', encoder is configured for '{}'",
                    vocabulary.colname, self.params.colname
                ),
            });
        }
        *self.vocabulary.write() = Some(vocabulary.labels);
        Ok(())
    }

    fn params(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }
}

/// Inverts label indices using a live, fitted [`LabelEncoder`].
///
/// The decoder holds the encoder itself rather than reading its stage
/// output; the graph records this as a fitted-state dependency.
#[derive(Debug, Clone)]
pub struct LabelDecoder {
    encoder: Arc<LabelEncoder>,
}

impl LabelDecoder {
    /// Creates a decoder over `encoder`.
    #[must_use]
    pub fn new(encoder: Arc<LabelEncoder>) -> Self {
        Self { encoder }
    }
}

#[async_trait]
impl Transformer for LabelDecoder {
    fn name(&self) -> &str {
        "LabelDecoder"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<String> {
        vec!["decoder_dict".to_string()]
    }

    async fn transform(&self, _inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        let vocabulary = self.encoder.vocabulary().ok_or_else(|| TransformError::NotFitted {
            transformer: LabelEncoder::NAME.to_string(),
        })?;
        let dict: serde_json::Map<String, Value> = vocabulary
            .into_iter()
            .enumerate()
            .map(|(i, label)| (i.to_string(), Value::String(label)))
            .collect();

        Ok(TransformOutputs::from([(
            "decoder_dict".to_string(),
            Value::Object(dict),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> TransformInputs {
        TransformInputs::new("LabelEncoder")
            .with(
                "annotations",
                json!([
                    {"ImageID": "img1", "LabelName": "/m/cat", "XMin": 0.1},
                    {"ImageID": "img2", "LabelName": "/m/dog", "XMin": 0.2},
                ]),
            )
            .with(
                "annotations_human_labels",
                json!([
                    {"LabelName": "/m/dog", "DisplayName": "Dog"},
                    {"LabelName": "/m/cat", "DisplayName": "Cat"},
                ]),
            )
    }

    #[tokio::test]
    async fn test_fit_transform_encodes_sorted_vocabulary() {
        let encoder = LabelEncoder::new(LabelEncoderParams::default());
        let out = encoder.fit_transform(&sample_inputs()).await.unwrap();

        assert_eq!(
            encoder.vocabulary(),
            Some(vec!["/m/cat".to_string(), "/m/dog".to_string()])
        );
        assert_eq!(out["annotations"][0][LabelEncoder::ENCODED_FIELD], json!(0));
        assert_eq!(out["annotations"][1][LabelEncoder::ENCODED_FIELD], json!(1));
        assert_eq!(out["annotations"][0]["ImageID"], json!("img1"));
    }

    #[tokio::test]
    async fn test_transform_before_fit_fails() {
        let encoder = LabelEncoder::new(LabelEncoderParams::default());
        let result = encoder.transform(&sample_inputs()).await;
        assert!(matches!(result, Err(TransformError::NotFitted { .. })));
    }

    #[tokio::test]
    async fn test_unknown_label_is_rejected() {
        let encoder = LabelEncoder::new(LabelEncoderParams::default());
        encoder.fit_transform(&sample_inputs()).await.unwrap();

        let inputs = TransformInputs::new("LabelEncoder")
            .with("annotations", json!([{"LabelName": "/m/bird"}]))
            .with("annotations_human_labels", json!([]));
        let result = encoder.transform(&inputs).await;
        assert!(matches!(result, Err(TransformError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_state_round_trip_through_second_encoder() {
        let fitted = LabelEncoder::new(LabelEncoderParams::default());
        fitted.fit_transform(&sample_inputs()).await.unwrap();

        let restored = LabelEncoder::new(LabelEncoderParams::default());
        restored.load_state(fitted.state().unwrap()).unwrap();
        assert_eq!(restored.vocabulary(), fitted.vocabulary());
    }

    #[test]
    fn test_state_from_other_column_is_rejected() {
        let encoder = LabelEncoder::new(LabelEncoderParams::default());
        let result = encoder.load_state(json!({"colname": "Other", "labels": []}));
        assert!(matches!(result, Err(TransformError::State { .. })));
    }

    #[tokio::test]
    async fn test_decoder_sees_encoder_fitted_later() {
        let encoder = Arc::new(LabelEncoder::new(LabelEncoderParams::default()));
        let decoder = LabelDecoder::new(Arc::clone(&encoder));
        let empty = TransformInputs::new("LabelDecoder");

        assert!(decoder.transform(&empty).await.is_err());

        encoder.fit_transform(&sample_inputs()).await.unwrap();
        let out = decoder.transform(&empty).await.unwrap();
        assert_eq!(out["decoder_dict"], json!({"0": "/m/cat", "1": "/m/dog"}));
    }
}
