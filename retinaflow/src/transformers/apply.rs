//! Per-item function application and the bounding-box resizer.

use super::{InputSpec, TransformInputs, TransformOutputs, Transformer};
use crate::errors::TransformError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// A pure function over one item of each zipped input.
pub type ApplyFn = Arc<dyn Fn(&[&Value]) -> Result<Value, String> + Send + Sync>;

/// Applies a pure function to every item of its (equal-length) array inputs.
#[derive(Clone)]
pub struct ApplyTransformer {
    func_name: String,
    func: ApplyFn,
    input_names: Vec<String>,
    output_name: String,
}

impl ApplyTransformer {
    const NAME: &'static str = "ApplyTransformer";

    /// Wraps `func`, zipping `input_names` item by item into `output_name`.
    #[must_use]
    pub fn new(
        func_name: impl Into<String>,
        func: ApplyFn,
        input_names: impl IntoIterator<Item = impl Into<String>>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            func_name: func_name.into(),
            func,
            input_names: input_names.into_iter().map(Into::into).collect(),
            output_name: output_name.into(),
        }
    }
}

impl fmt::Debug for ApplyTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyTransformer")
            .field("func", &self.func_name)
            .field("inputs", &self.input_names)
            .field("output", &self.output_name)
            .finish()
    }
}

#[async_trait]
impl Transformer for ApplyTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<InputSpec> {
        self.input_names.iter().map(InputSpec::required).collect()
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.output_name.clone()]
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        let columns = self
            .input_names
            .iter()
            .map(|name| {
                inputs.require(name)?.as_array().ok_or_else(|| {
                    TransformError::invalid_input(Self::NAME, name, "expected an array")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let len = columns.first().map_or(0, |c| c.len());
        if let Some((name, column)) = self
            .input_names
            .iter()
            .zip(&columns)
            .find(|(_, c)| c.len() != len)
        {
            return Err(TransformError::invalid_input(
                Self::NAME,
                name,
                format!("has {} items, expected {len}", column.len()),
            ));
        }

        let items = (0..len)
            .map(|i| {
                let args: Vec<&Value> = columns.iter().map(|c| &c[i]).collect();
                (self.func)(&args).map_err(|reason| {
                    TransformError::invalid_input(
                        Self::NAME,
                        &self.output_name,
                        format!("{} failed on item {i}: {reason}", self.func_name),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformOutputs::from([(
            self.output_name.clone(),
            Value::Array(items),
        )]))
    }

    fn params(&self) -> Value {
        json!({"func": self.func_name, "inputs": self.input_names, "output": self.output_name})
    }
}

fn input_size(result: &Value) -> Result<[f64; 2], String> {
    match result["input_size"].as_array().map(Vec::as_slice) {
        Some([w, h]) => match (w.as_f64(), h.as_f64()) {
            (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Ok([w, h]),
            _ => Err("input_size must hold two positive numbers".to_string()),
        },
        _ => Err("input_size must be a [width, height] pair".to_string()),
    }
}

/// Rescales one image's detections from network input pixels to
/// coordinates relative to the original image, clipped to `[0, 1]`.
///
/// The network input is the whole image resized, so relative coordinates
/// hold for the original resolution. Expects `args[0]` to be a decoded
/// result (`detections`, `input_size`).
pub fn resize_bboxes(args: &[&Value]) -> Result<Value, String> {
    let [result] = args else {
        return Err(format!("expected 1 argument, got {}", args.len()));
    };
    let [in_w, in_h] = input_size(result)?;

    let detections = result["detections"]
        .as_array()
        .ok_or("detections must be an array")?
        .iter()
        .map(|detection| {
            let bbox: Vec<f64> = detection["bbox"]
                .as_array()
                .filter(|b| b.len() == 4)
                .ok_or("bbox must hold four coordinates")?
                .iter()
                .map(|c| c.as_f64().ok_or("bbox coordinates must be numbers"))
                .collect::<Result<_, _>>()?;
            let resized = [
                (bbox[0] / in_w).clamp(0.0, 1.0),
                (bbox[1] / in_h).clamp(0.0, 1.0),
                (bbox[2] / in_w).clamp(0.0, 1.0),
                (bbox[3] / in_h).clamp(0.0, 1.0),
            ];
            let mut out = detection.clone();
            out["bbox"] = json!(resized);
            Ok(out)
        })
        .collect::<Result<Vec<_>, &str>>()?;

    Ok(json!({"detections": detections}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resizer() -> ApplyTransformer {
        ApplyTransformer::new(
            "resize_bboxes",
            Arc::new(resize_bboxes),
            ["results"],
            "resized_results",
        )
    }

    fn scale(args: &[&Value]) -> Result<Value, String> {
        match args {
            [x, k] => Ok(json!(x.as_f64().unwrap_or_default() * k.as_f64().unwrap_or_default())),
            _ => Err("expected 2 arguments".to_string()),
        }
    }

    fn scaler() -> ApplyTransformer {
        ApplyTransformer::new("scale", Arc::new(scale), ["x", "k"], "scaled")
    }

    #[test]
    fn test_resize_makes_boxes_relative_and_clips() {
        let result = json!({
            "input_size": [100, 200],
            "detections": [{"bbox": [10, 20, 50, 250], "score": 0.9, "label": 1}],
        });
        let resized = resize_bboxes(&[&result]).unwrap();

        assert_eq!(resized["detections"][0]["bbox"], json!([0.1, 0.1, 0.5, 1.0]));
        assert_eq!(resized["detections"][0]["score"], json!(0.9));
    }

    #[test]
    fn test_resize_rejects_bad_sizes() {
        let result = json!({"input_size": [0, 100], "detections": []});
        assert!(resize_bboxes(&[&result]).is_err());
        assert!(resize_bboxes(&[&result, &json!([10, 10])]).is_err());
    }

    #[tokio::test]
    async fn test_resizer_reads_results_only() {
        let inputs = TransformInputs::new("resizer").with(
            "results",
            json!([
                {"input_size": [10, 10], "detections": [{"bbox": [1, 1, 2, 2]}]},
                {"input_size": [10, 10], "detections": []},
            ]),
        );

        let out = resizer().transform(&inputs).await.unwrap();
        let items = out["resized_results"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["detections"][0]["bbox"], json!([0.1, 0.1, 0.2, 0.2]));
        assert_eq!(items[1]["detections"], json!([]));
    }

    #[tokio::test]
    async fn test_apply_zips_inputs() {
        let inputs = TransformInputs::new("scale")
            .with("x", json!([1.0, 2.0]))
            .with("k", json!([3.0, 0.5]));

        let out = scaler().transform(&inputs).await.unwrap();
        assert_eq!(out["scaled"], json!([3.0, 1.0]));
    }

    #[tokio::test]
    async fn test_apply_rejects_length_mismatch() {
        let inputs = TransformInputs::new("scale")
            .with("x", json!([1.0, 2.0]))
            .with("k", json!([1.0]));

        let result = scaler().transform(&inputs).await;
        assert!(matches!(
            result,
            Err(TransformError::InvalidInput { ref input, .. }) if input == "k"
        ));
    }
}
