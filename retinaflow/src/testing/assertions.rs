//! Assertions over compiled graphs.

use crate::pipeline::{PipelineGraph, SourceDescriptor};
use std::collections::BTreeSet;

/// Asserts that the graph holds exactly the named stages, in any order.
pub fn assert_stage_names(graph: &PipelineGraph, expected: &[&str]) {
    let actual: BTreeSet<&str> = graph.stage_names().into_iter().collect();
    let expected_set: BTreeSet<&str> = expected.iter().copied().collect();
    assert_eq!(
        actual, expected_set,
        "Stage set of '{}' differs from the expected set",
        graph.name()
    );
}

/// Asserts that `stage.input` is wired to output `field` of `source_stage`.
pub fn assert_stage_source(graph: &PipelineGraph, stage: &str, input: &str, source_stage: &str, field: &str) {
    let descriptor = graph.descriptor();
    let actual = descriptor
        .stage(stage)
        .and_then(|s| s.adapter.get(input))
        .cloned();
    let expected = SourceDescriptor::StageOutput {
        stage: source_stage.to_string(),
        field: field.to_string(),
    };
    assert_eq!(
        actual,
        Some(expected),
        "Expected '{stage}.{input}' to read '{source_stage}.{field}'"
    );
}

/// Asserts that `input` of `stage` is explicitly absent.
pub fn assert_input_absent(graph: &PipelineGraph, stage: &str, input: &str) {
    let descriptor = graph.descriptor();
    let actual = descriptor.stage(stage).and_then(|s| s.adapter.get(input)).cloned();
    assert_eq!(
        actual,
        Some(SourceDescriptor::Absent),
        "Expected '{stage}.{input}' to be absent"
    );
}

/// Asserts that `ancestor` is reachable from `stage` through input steps.
pub fn assert_upstream(graph: &PipelineGraph, ancestor: &str, stage: &str) {
    let (Some(a), Some(s)) = (graph.stage_by_name(ancestor), graph.stage_by_name(stage)) else {
        panic!("Stages '{ancestor}' and '{stage}' must both exist in '{}'", graph.name());
    };
    assert!(
        graph.is_upstream(a.id(), s.id()),
        "Expected '{ancestor}' to be upstream of '{stage}'"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::retinanet_inference;
    use crate::testing::sample_config;

    #[test]
    fn test_assertions_pass_on_inference_graph() {
        let graph = retinanet_inference(&sample_config("/tmp/x")).unwrap();
        assert_stage_source(&graph, "decoder", "predictions", "retinanet", "predictions");
        assert_input_absent(&graph, "retinanet", "validation_datagen");
        assert_upstream(&graph, "loader", "submission_producer");
    }

    #[test]
    #[should_panic(expected = "Stage set")]
    fn test_stage_names_mismatch_panics() {
        let graph = retinanet_inference(&sample_config("/tmp/x")).unwrap();
        assert_stage_names(&graph, &["loader"]);
    }
}
