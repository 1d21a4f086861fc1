//! # Retinaflow
//!
//! Declarative stage graphs for RetinaNet object detection.
//!
//! Retinaflow compiles a configuration into a validated graph of stages,
//! each wrapping one transformer, and runs it:
//!
//! - **Typed wiring**: every transformer input is mapped to a bundle field,
//!   an upstream stage output or an explicit absence, and checked when the
//!   stage is added
//! - **Train and inference graphs** compiled from the same sub-graph builders
//! - **Concurrent execution** with fitted-state persistence and output reuse
//! - **Event-driven observability** through pluggable event sinks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use retinaflow::prelude::*;
//!
//! let config = PipelineConfig::from_path("config.json")?.with_detection_model(backend);
//! let graph = PipelineRegistry::default().compile("retinanet", Mode::Train, &config)?;
//!
//! let report = GraphRunner::default()
//!     .run(&graph, &bundles, RunMode::Fit)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod testing;
pub mod transformers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EnvConfig, PipelineConfig};
    pub use crate::core::{Adapter, BundleCatalog, DataBundles, Mode, Source, Stage, StageId, StageSpec};
    pub use crate::errors::{ConfigError, ContractErrorInfo, GraphError, RunError, TransformError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        GraphBuilder, GraphDescriptor, GraphRunner, PipelineGraph, PipelineRegistry, RunMode,
        RunReport,
    };
    pub use crate::transformers::{DetectionModel, TransformInputs, TransformOutputs, Transformer};
}
