//! Resolution of stage adapters against run-time data.

use super::PipelineGraph;
use crate::core::{DataBundles, Source, Stage, StageId};
use crate::errors::RunError;
use crate::transformers::{TransformInputs, TransformOutputs};
use std::collections::BTreeMap;

/// Builds a stage's transformer inputs.
///
/// `External` sources read from `bundles`, `StageOutput` sources read from
/// the outputs of already-completed stages, and `Absent` sources are
/// delivered as `None`. Values are cloned; stages never share data.
///
/// # Errors
///
/// Returns an error if a referenced bundle, bundle field or upstream output
/// is missing. Nothing is defaulted.
pub fn resolve(
    graph: &PipelineGraph,
    stage: &Stage,
    bundles: &DataBundles,
    completed: &BTreeMap<StageId, TransformOutputs>,
) -> Result<TransformInputs, RunError> {
    let mut inputs = TransformInputs::new(stage.transformer().name());

    for (input, source) in stage.adapter().iter() {
        let value = match source {
            Source::External { bundle, field } => {
                if !bundles.has_bundle(bundle) {
                    return Err(RunError::MissingBundle {
                        stage: stage.name().to_string(),
                        bundle: bundle.clone(),
                    });
                }
                let value = bundles.field(bundle, field).ok_or_else(|| {
                    RunError::MissingBundleField {
                        stage: stage.name().to_string(),
                        bundle: bundle.clone(),
                        field: field.clone(),
                    }
                })?;
                Some(value.clone())
            }
            Source::StageOutput {
                stage: upstream,
                field,
            } => {
                let value = completed
                    .get(upstream)
                    .and_then(|outputs| outputs.get(field))
                    .ok_or_else(|| RunError::MissingStageOutput {
                        stage: stage.name().to_string(),
                        source_stage: graph
                            .stage(*upstream)
                            .map_or_else(|| upstream.to_string(), |s| s.name().to_string()),
                        field: field.clone(),
                    })?;
                Some(value.clone())
            }
            Source::Absent => None,
        };
        inputs.insert(input, value);
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Adapter, StageSpec};
    use crate::pipeline::GraphBuilder;
    use crate::transformers::{IdentityOperation, Retina, RetinaParams};
    use serde_json::json;
    use std::sync::Arc;

    fn graph() -> (PipelineGraph, StageId, StageId) {
        let mut builder = GraphBuilder::new("resolve");
        let loader = builder
            .add_stage(
                StageSpec::new("loader", Arc::new(IdentityOperation::new(["ids"])))
                    .with_input_data(["input"])
                    .with_adapter(Adapter::new().map("ids", Source::external("input", "img_ids"))),
            )
            .unwrap();
        let model = builder
            .add_stage(
                StageSpec::new("model", Arc::new(Retina::new(RetinaParams::default(), false)))
                    .with_input_steps([loader])
                    .with_adapter(
                        Adapter::new()
                            .map("datagen", Source::stage(loader, "ids"))
                            .absent("validation_datagen"),
                    ),
            )
            .unwrap();
        (builder.finish(model).unwrap(), loader, model)
    }

    #[test]
    fn test_resolves_every_source_kind() {
        let (graph, loader, model) = graph();
        let completed = BTreeMap::from([(
            loader,
            TransformOutputs::from([("ids".to_string(), json!(["a"]))]),
        )]);

        let inputs = resolve(&graph, graph.stage(model).unwrap(), &DataBundles::new(), &completed).unwrap();
        assert_eq!(inputs.get("datagen"), Some(&json!(["a"])));
        assert!(inputs.is_absent("validation_datagen"));
    }

    #[test]
    fn test_missing_bundle_and_field() {
        let (graph, loader, _) = graph();
        let stage = graph.stage(loader).unwrap();

        let err = resolve(&graph, stage, &DataBundles::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, RunError::MissingBundle { ref bundle, .. } if bundle == "input"));

        let bundles = DataBundles::new().with_field("input", "image_size", json!([]));
        let err = resolve(&graph, stage, &bundles, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, RunError::MissingBundleField { ref field, .. } if field == "img_ids"));
    }

    #[test]
    fn test_missing_upstream_output() {
        let (graph, loader, model) = graph();
        let completed = BTreeMap::from([(loader, TransformOutputs::new())]);

        let err = resolve(&graph, graph.stage(model).unwrap(), &DataBundles::new(), &completed).unwrap_err();
        assert!(matches!(
            err,
            RunError::MissingStageOutput { ref source_stage, .. } if source_stage == "loader"
        ));
    }
}
