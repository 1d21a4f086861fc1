//! Sample configuration and data bundles.

use crate::config::PipelineConfig;
use crate::core::bundle::{INPUT, METADATA, SPECS, VALIDATION_INPUT};
use crate::core::DataBundles;
use serde_json::{json, Value};
use std::path::Path;

/// Image ids used by every sample bundle.
pub const SAMPLE_IMAGE_IDS: [&str; 2] = ["img1", "img2"];

/// A configuration with every section at its defaults, rooted at
/// `cache_dirpath`.
#[must_use]
pub fn sample_config(cache_dirpath: impl AsRef<Path>) -> PipelineConfig {
    PipelineConfig::new(cache_dirpath.as_ref())
}

/// Annotation rows for the sample images, two classes.
#[must_use]
pub fn sample_annotations() -> Value {
    json!([
        {"ImageID": "img1", "LabelName": "/m/cat", "XMin": 0.1, "YMin": 0.1, "XMax": 0.5, "YMax": 0.5},
        {"ImageID": "img2", "LabelName": "/m/dog", "XMin": 0.2, "YMin": 0.3, "XMax": 0.9, "YMax": 0.8},
        {"ImageID": "img2", "LabelName": "/m/cat", "XMin": 0.0, "YMin": 0.0, "XMax": 0.2, "YMax": 0.2},
    ])
}

/// The class vocabulary rows.
#[must_use]
pub fn sample_human_labels() -> Value {
    json!([
        {"LabelName": "/m/dog", "DisplayName": "Dog"},
        {"LabelName": "/m/cat", "DisplayName": "Cat"},
    ])
}

fn common_bundles() -> DataBundles {
    DataBundles::new()
        .with_field(METADATA, "annotations", sample_annotations())
        .with_field(METADATA, "annotations_human_labels", sample_human_labels())
        .with_field(INPUT, "img_ids", json!(SAMPLE_IMAGE_IDS))
        .with_field(INPUT, "image_ids", json!(SAMPLE_IMAGE_IDS))
        .with_field(INPUT, "image_size", json!([[1024, 768], [640, 480]]))
}

/// Bundles a training run reads.
#[must_use]
pub fn train_bundles() -> DataBundles {
    common_bundles().with_field(VALIDATION_INPUT, "valid_img_ids", json!(["img2"]))
}

/// Bundles an inference run reads.
#[must_use]
pub fn inference_bundles() -> DataBundles {
    common_bundles().with_field(SPECS, "img_ids", json!(SAMPLE_IMAGE_IDS))
}
