//! Detection data loader descriptors.

use super::{InputSpec, TransformInputs, TransformOutputs, Transformer};
use crate::errors::TransformError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Construction parameters for [`ImageDetectionLoader`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderParams {
    /// Images per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Worker threads the data pipeline may use.
    #[serde(default)]
    pub num_workers: usize,
    /// Whether training batches are shuffled.
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    /// Network input resolution as `[width, height]`.
    #[serde(default = "default_target_size")]
    pub target_size: [u32; 2],
    /// Parameters forwarded verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const fn default_batch_size() -> usize {
    4
}

const fn default_shuffle() -> bool {
    true
}

const fn default_target_size() -> [u32; 2] {
    [512, 512]
}

impl Default for LoaderParams {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_workers: 0,
            shuffle: default_shuffle(),
            target_size: default_target_size(),
            extra: BTreeMap::new(),
        }
    }
}

/// Builds the data-generator descriptors the model stage consumes.
///
/// In train mode the loader needs validation ids and encoded annotations.
/// In inference mode both annotation inputs arrive absent and only ids are
/// read.
#[derive(Debug, Clone)]
pub struct ImageDetectionLoader {
    train_mode: bool,
    params: LoaderParams,
}

impl ImageDetectionLoader {
    const NAME: &'static str = "ImageDetectionLoader";

    /// Creates a loader.
    #[must_use]
    pub fn new(train_mode: bool, params: LoaderParams) -> Self {
        Self { train_mode, params }
    }

    /// Whether the loader was built for training.
    #[must_use]
    pub const fn train_mode(&self) -> bool {
        self.train_mode
    }

    fn ids<'a>(inputs: &'a TransformInputs, name: &str) -> Result<&'a Vec<Value>, TransformError> {
        inputs.require(name)?.as_array().ok_or_else(|| {
            TransformError::invalid_input(Self::NAME, name, "expected an array of image ids")
        })
    }

    fn datagen(&self, ids: &[Value], annotations: Option<&BTreeMap<String, Vec<Value>>>, shuffle: bool) -> Value {
        let images: Vec<Value> = ids
            .iter()
            .map(|id| {
                let boxes = id
                    .as_str()
                    .and_then(|key| annotations.and_then(|a| a.get(key)))
                    .cloned()
                    .unwrap_or_default();
                match annotations {
                    Some(_) => json!({"id": id, "annotations": boxes}),
                    None => json!({"id": id}),
                }
            })
            .collect();

        json!({
            "images": images,
            "batch_size": self.params.batch_size,
            "num_workers": self.params.num_workers,
            "shuffle": shuffle,
            "target_size": self.params.target_size,
        })
    }
}

fn group_by_image(annotations: &Value) -> Result<BTreeMap<String, Vec<Value>>, TransformError> {
    let rows = annotations.as_array().ok_or_else(|| {
        TransformError::invalid_input(
            ImageDetectionLoader::NAME,
            "annotations",
            "expected an array of rows",
        )
    })?;

    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for row in rows {
        let image = row.get("ImageID").and_then(Value::as_str).ok_or_else(|| {
            TransformError::invalid_input(
                ImageDetectionLoader::NAME,
                "annotations",
                "row has no string 'ImageID'",
            )
        })?;
        grouped.entry(image.to_string()).or_default().push(row.clone());
    }
    Ok(grouped)
}

#[async_trait]
impl Transformer for ImageDetectionLoader {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::required("ids"),
            InputSpec::optional("valid_ids"),
            InputSpec::optional("annotations"),
            InputSpec::optional("annotations_human_labels"),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        vec!["datagen".to_string(), "validation_datagen".to_string()]
    }

    async fn transform(&self, inputs: &TransformInputs) -> Result<TransformOutputs, TransformError> {
        let ids = Self::ids(inputs, "ids")?;

        if !self.train_mode {
            return Ok(TransformOutputs::from([
                ("datagen".to_string(), self.datagen(ids, None, false)),
                ("validation_datagen".to_string(), Value::Null),
            ]));
        }

        let valid_ids = Self::ids(inputs, "valid_ids")?;
        let annotations = group_by_image(inputs.require("annotations")?)?;
        Ok(TransformOutputs::from([
            (
                "datagen".to_string(),
                self.datagen(ids, Some(&annotations), self.params.shuffle),
            ),
            (
                "validation_datagen".to_string(),
                self.datagen(valid_ids, Some(&annotations), false),
            ),
        ]))
    }

    fn params(&self) -> Value {
        json!({"train_mode": self.train_mode, "params": self.params})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_train_loader_groups_annotations() {
        let loader = ImageDetectionLoader::new(true, LoaderParams::default());
        let inputs = TransformInputs::new("loader")
            .with("ids", json!(["a", "b"]))
            .with("valid_ids", json!(["c"]))
            .with(
                "annotations",
                json!([
                    {"ImageID": "a", "LabelEncoded": 0},
                    {"ImageID": "a", "LabelEncoded": 1},
                    {"ImageID": "c", "LabelEncoded": 1},
                ]),
            )
            .with("annotations_human_labels", json!([]));

        let out = loader.transform(&inputs).await.unwrap();
        let images = out["datagen"]["images"].as_array().unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0]["annotations"].as_array().unwrap().len(), 2);
        assert_eq!(images[1]["annotations"], json!([]));
        assert_eq!(out["datagen"]["shuffle"], json!(true));
        assert_eq!(out["validation_datagen"]["images"][0]["id"], json!("c"));
        assert_eq!(out["validation_datagen"]["shuffle"], json!(false));
    }

    #[tokio::test]
    async fn test_train_loader_requires_validation_ids() {
        let loader = ImageDetectionLoader::new(true, LoaderParams::default());
        let inputs = TransformInputs::new("loader")
            .with("ids", json!(["a"]))
            .with("annotations", json!([]));

        let result = loader.transform(&inputs).await;
        assert!(matches!(
            result,
            Err(TransformError::MissingInput { ref input, .. }) if input == "valid_ids"
        ));
    }

    #[tokio::test]
    async fn test_inference_loader_tolerates_absent_annotations() {
        let loader = ImageDetectionLoader::new(false, LoaderParams::default());
        let inputs = TransformInputs::new("loader")
            .with("ids", json!(["x", "y"]))
            .with_absent("annotations")
            .with_absent("annotations_human_labels");

        let out = loader.transform(&inputs).await.unwrap();
        assert_eq!(out["datagen"]["images"], json!([{"id": "x"}, {"id": "y"}]));
        assert_eq!(out["validation_datagen"], Value::Null);
    }

    #[test]
    fn test_params_keep_unknown_keys() {
        let params: LoaderParams =
            serde_json::from_value(json!({"batch_size": 8, "augmentation": "flip"})).unwrap();
        assert_eq!(params.batch_size, 8);
        assert_eq!(params.target_size, [512, 512]);
        assert_eq!(params.extra.get("augmentation"), Some(&json!("flip")));
    }
}
