//! Prediction decoding and submission building.

use super::{InputSpec, TransformInputs, TransformOutputs, Transformer};
use crate::errors::TransformError;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Turns raw per-image model predictions into scored detections.
#[derive(Debug, Clone)]
pub struct DataDecoder {
    input_size: [u32; 2],
    score_threshold: f64,
}

impl DataDecoder {
    const NAME: &'static str = "DataDecoder";

    /// Creates a decoder for a network with the given input resolution.
    #[must_use]
    pub const fn new(input_size: [u32; 2], score_threshold: f64) -> Self {
        Self {
            input_size,
            score_threshold,
        }
    }

    fn invalid(reason: impl Into<String>) -> TransformError {
        TransformError::invalid_input(Self::NAME, "predictions", reason)
    }

    fn decode_image(&self, prediction: &Value) -> Result<Value, TransformError> {
        let column = |name: &str| {
            prediction[name]
                .as_array()
                .ok_or_else(|| Self::invalid(format!("prediction has no '{name}' array")))
        };
        let (boxes, scores, labels) = (column("boxes")?, column("scores")?, column("labels")?);
        if boxes.len() != scores.len() || boxes.len() != labels.len() {
            return Err(Self::invalid("boxes, scores and labels differ in length"));
        }

        let mut detections = Vec::with_capacity(boxes.len());
        for ((bbox, score), label) in boxes.iter().zip(scores).zip(labels) {
            let score = score
                .as_f64()
                .ok_or_else(|| Self::invalid("scores must be numbers"))?;
            if score < self.score_threshold {
                continue;
            }
            let label = label
                .as_u64()
                .ok_or_else(|| Self::invalid("labels must be non-negative integers"))?;
            detections.push((score, json!({"bbox": bbox, "score": score, "label": label})));
        }
        detections.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(json!({
            "input_size": self.input_size,
            "detections": detections.into_iter().map(|(_, d)| d).collect::<Vec<_>>(),
        }))
    }
}

#[async_trait]
impl Transformer for DataDecoder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![InputSpec::required("predictions")]
    }

    fn outputs(&self) -> Vec<String> {
        vec!["results".to_string()]
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        let results = inputs
            .require("predictions")?
            .as_array()
            .ok_or_else(|| Self::invalid("expected one prediction per image"))?
            .iter()
            .map(|p| self.decode_image(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformOutputs::from([(
            "results".to_string(),
            Value::Array(results),
        )]))
    }

    fn params(&self) -> Value {
        json!({"input_size": self.input_size, "score_threshold": self.score_threshold})
    }
}

/// Builds the per-image submission rows.
///
/// Each row carries the image id and an Open Images style prediction string:
/// `label score xmin ymin xmax ymax` per detection. Results hold boxes
/// relative to the image; they are snapped to the original image's pixel
/// grid, then written normalized to its size.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmissionProducer;

impl SubmissionProducer {
    const NAME: &'static str = "SubmissionProducer";

    fn array<'a>(inputs: &'a TransformInputs, name: &str) -> Result<&'a Vec<Value>, TransformError> {
        inputs
            .require(name)?
            .as_array()
            .ok_or_else(|| TransformError::invalid_input(Self::NAME, name, "expected an array"))
    }

    fn prediction_string(
        result: &Value,
        image_size: &Value,
        decoder_dict: &serde_json::Map<String, Value>,
    ) -> Result<String, TransformError> {
        let invalid = |input: &str, reason: String| TransformError::invalid_input(Self::NAME, input, reason);
        let size: Vec<f64> = image_size
            .as_array()
            .map(|s| s.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let [w, h] = size[..] else {
            return Err(invalid("image_size", "expected [width, height]".to_string()));
        };
        if w <= 0.0 || h <= 0.0 {
            return Err(invalid("image_size", format!("{w}x{h} is not a valid image size")));
        }
        let snap = |relative: f64, extent: f64| (relative * extent).round().clamp(0.0, extent) / extent;

        let detections = result["detections"]
            .as_array()
            .ok_or_else(|| invalid("results", "result has no detections".to_string()))?;

        let mut parts = Vec::with_capacity(detections.len());
        for detection in detections {
            let label = detection["label"].as_u64().map(|l| l.to_string()).unwrap_or_default();
            let name = decoder_dict
                .get(&label)
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("decoder_dict", format!("no class for label '{label}'")))?;
            let score = detection["score"].as_f64().unwrap_or_default();
            let bbox: Vec<f64> = detection["bbox"]
                .as_array()
                .map(|b| b.iter().filter_map(Value::as_f64).collect())
                .unwrap_or_default();
            let [x1, y1, x2, y2] = bbox[..] else {
                return Err(invalid("results", "bbox must hold four coordinates".to_string()));
            };
            parts.push(format!(
                "{name} {score:.4} {:.4} {:.4} {:.4} {:.4}",
                snap(x1, w),
                snap(y1, h),
                snap(x2, w),
                snap(y2, h)
            ));
        }
        Ok(parts.join(" "))
    }
}

#[async_trait]
impl Transformer for SubmissionProducer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<InputSpec> {
        ["image_ids", "image_size", "results", "decoder_dict"]
            .into_iter()
            .map(InputSpec::required)
            .collect()
    }

    fn outputs(&self) -> Vec<String> {
        vec!["postprocessed_images".to_string()]
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        let ids = Self::array(inputs, "image_ids")?;
        let sizes = Self::array(inputs, "image_size")?;
        let results = Self::array(inputs, "results")?;
        let decoder_dict = inputs.require("decoder_dict")?.as_object().ok_or_else(|| {
            TransformError::invalid_input(Self::NAME, "decoder_dict", "expected an object")
        })?;

        if ids.len() != sizes.len() || ids.len() != results.len() {
            return Err(TransformError::invalid_input(
                Self::NAME,
                "results",
                format!(
                    "{} image ids, {} sizes and {} results do not line up",
                    ids.len(),
                    sizes.len(),
                    results.len()
                ),
            ));
        }

        let rows = ids
            .iter()
            .zip(sizes)
            .zip(results)
            .map(|((id, size), result)| {
                Ok(json!({
                    "ImageId": id,
                    "PredictionString": Self::prediction_string(result, size, decoder_dict)?,
                }))
            })
            .collect::<Result<Vec<_>, TransformError>>()?;

        Ok(TransformOutputs::from([(
            "postprocessed_images".to_string(),
            Value::Array(rows),
        )]))
    }
}
