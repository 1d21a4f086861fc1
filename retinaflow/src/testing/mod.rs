//! Testing utilities for detection pipelines.
//!
//! This module provides:
//! - Sample configuration and data bundles
//! - A stub detection backend and wrapping transformers
//! - Assertions over compiled graphs

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_input_absent, assert_stage_names, assert_stage_source, assert_upstream};
pub use fixtures::{
    inference_bundles, sample_annotations, sample_config, sample_human_labels, train_bundles,
    SAMPLE_IMAGE_IDS,
};
pub use mocks::{DelayedTransformer, FailingTransformer, RecordingTransformer, StubDetector};
