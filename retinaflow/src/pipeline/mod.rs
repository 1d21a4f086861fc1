//! Pipeline building, compilation and execution.
//!
//! This module provides:
//! - A graph builder with wiring validation
//! - Compiled graphs and their structural descriptors
//! - The RetinaNet pipeline compilers and the pipeline registry
//! - A concurrent graph runner

pub mod adapter;
mod builder;
mod graph;
mod registry;
mod retinanet;
mod runner;


pub use builder::GraphBuilder;
pub use graph::{GraphDescriptor, PipelineGraph, SourceDescriptor, StageDescriptor};
pub use registry::{PipelineFactory, PipelineRegistry};
pub use retinanet::{
    postprocessing, preprocessing, retinanet, retinanet_inference, retinanet_train,
    Preprocessing, RETINANET,
};
pub use runner::{output_path, state_path, GraphRunner, RunMode, RunReport};
