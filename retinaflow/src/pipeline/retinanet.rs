//! The RetinaNet detection pipelines.
//!
//! [`retinanet`] assembles the train or inference graph from two reusable
//! sub-graph builders, [`preprocessing`] and [`postprocessing`], which add
//! their stages to a caller-owned [`GraphBuilder`].

use super::{GraphBuilder, PipelineGraph};
use crate::config::PipelineConfig;
use crate::core::bundle::{INPUT, METADATA, SPECS, VALIDATION_INPUT};
use crate::core::{Adapter, BundleCatalog, Mode, Source, StageId, StageSpec};
use crate::errors::GraphError;
use crate::transformers::{
    resize_bboxes, ApplyTransformer, DataDecoder, IdentityOperation, ImageDetectionLoader,
    LabelDecoder, LabelEncoder, Retina, SubmissionProducer, Transformer,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Registry name of the RetinaNet pipelines.
pub const RETINANET: &str = "retinanet";

/// Handles returned by [`preprocessing`].
#[derive(Debug, Clone)]
pub struct Preprocessing {
    /// The loader stage, which the model stage consumes.
    pub loader: StageId,
    /// The label encoder stage.
    pub label_encoder: StageId,
    /// The encoder instance behind `label_encoder`, shared with any stage
    /// that needs its fitted vocabulary.
    pub encoder: Arc<LabelEncoder>,
}

/// Builds a stage with the artifact settings every RetinaNet stage shares.
fn stage(name: &str, transformer: Arc<dyn Transformer>, cache_dirpath: &Path) -> StageSpec {
    StageSpec::new(name, transformer)
        .with_persistence(false, false)
        .with_experiment_directory(cache_dirpath)
}

/// Adds the label encoder and loader stages.
///
/// The label encoder is built in both modes; in inference the loader
/// depends on it without reading its data.
///
/// # Errors
///
/// Returns an error if a config section is missing or a stage fails
/// validation.
pub fn preprocessing(
    builder: &mut GraphBuilder,
    config: &PipelineConfig,
    mode: Mode,
) -> Result<Preprocessing, GraphError> {
    let cache_dirpath = config.cache_dirpath()?;
    let encoder = Arc::new(LabelEncoder::new(config.label_encoder()?.clone()));
    let loader_transformer = Arc::new(ImageDetectionLoader::new(
        mode.is_train(),
        config.loader()?.clone(),
    ));

    let label_encoder = builder.add_stage(
        stage("label_encoder", encoder.clone(), cache_dirpath)
            .with_input_data([METADATA])
            .with_adapter(
                Adapter::new()
                    .map("annotations", Source::external(METADATA, "annotations"))
                    .map(
                        "annotations_human_labels",
                        Source::external(METADATA, "annotations_human_labels"),
                    ),
            )
            .trainable(),
    )?;

    let loader_spec = match mode {
        Mode::Train => stage("loader", loader_transformer, cache_dirpath)
            .with_input_data([INPUT, VALIDATION_INPUT])
            .with_input_steps([label_encoder])
            .with_adapter(
                Adapter::new()
                    .map("ids", Source::external(INPUT, "img_ids"))
                    .map("valid_ids", Source::external(VALIDATION_INPUT, "valid_img_ids"))
                    .map("annotations", Source::stage(label_encoder, "annotations"))
                    .map(
                        "annotations_human_labels",
                        Source::stage(label_encoder, "annotations_human_labels"),
                    ),
            ),
        Mode::Inference => stage("loader", loader_transformer, cache_dirpath)
            .with_input_data([SPECS])
            .with_input_steps([label_encoder])
            .with_adapter(
                Adapter::new()
                    .map("ids", Source::external(SPECS, "img_ids"))
                    .absent("annotations")
                    .absent("annotations_human_labels"),
            ),
    };
    let loader = builder.add_stage(loader_spec)?;

    Ok(Preprocessing {
        loader,
        label_encoder,
        encoder,
    })
}

/// Adds the chain that turns model predictions into submission rows and
/// returns the `submission_producer` handle.
///
/// `encoder` must be the instance behind `label_encoder`; the decoder reads
/// its fitted vocabulary.
///
/// # Errors
///
/// Returns an error if a config section is missing or a stage fails
/// validation.
pub fn postprocessing(
    builder: &mut GraphBuilder,
    model: StageId,
    label_encoder: StageId,
    encoder: Arc<LabelEncoder>,
    config: &PipelineConfig,
) -> Result<StageId, GraphError> {
    let cache_dirpath = config.cache_dirpath()?;
    let input_size = config.loader()?.target_size;
    let score_threshold = config.retinanet()?.score_threshold;

    let label_decoder = builder.add_stage(
        stage("label_decoder", Arc::new(LabelDecoder::new(encoder)), cache_dirpath)
            .with_input_steps([model])
            .depends_on_state_of(label_encoder),
    )?;

    let decoder = builder.add_stage(
        stage(
            "decoder",
            Arc::new(DataDecoder::new(input_size, score_threshold)),
            cache_dirpath,
        )
        .with_input_steps([model])
        .with_adapter(Adapter::new().map("predictions", Source::stage(model, "predictions"))),
    )?;

    let resizer = builder.add_stage(
        stage(
            "resizer",
            Arc::new(ApplyTransformer::new(
                "resize_bboxes",
                Arc::new(resize_bboxes),
                ["results"],
                "resized_results",
            )),
            cache_dirpath,
        )
        .with_input_steps([decoder])
        .with_adapter(Adapter::new().map("results", Source::stage(decoder, "results"))),
    )?;

    builder.add_stage(
        stage("submission_producer", Arc::new(SubmissionProducer), cache_dirpath)
            .with_input_steps([resizer, label_decoder])
            .with_input_data([INPUT])
            .with_adapter(
                Adapter::new()
                    .map("image_ids", Source::external(INPUT, "img_ids"))
                    .map("image_size", Source::external(INPUT, "image_size"))
                    .map("results", Source::stage(resizer, "resized_results"))
                    .map("decoder_dict", Source::stage(label_decoder, "decoder_dict")),
            ),
    )
}

/// Compiles the RetinaNet pipeline for `mode`.
///
/// In train mode the model stage is terminal. In inference mode the
/// postprocessing chain is attached and an `output` stage exposing `y_pred`
/// is terminal.
///
/// # Errors
///
/// Returns an error if a config section is missing or a stage fails
/// validation.
pub fn retinanet(config: &PipelineConfig, mode: Mode) -> Result<PipelineGraph, GraphError> {
    let cache_dirpath = config.cache_dirpath()?;
    let mut builder =
        GraphBuilder::new(RETINANET).with_catalog(BundleCatalog::for_mode(mode));

    let Preprocessing {
        loader,
        label_encoder,
        encoder,
    } = preprocessing(&mut builder, config, mode)?;

    let retina = Retina::new(config.retinanet()?.clone(), mode.is_train())
        .with_backend(config.detection_model.clone());
    let validation_datagen = match mode {
        Mode::Train => Source::stage(loader, "validation_datagen"),
        Mode::Inference => Source::Absent,
    };
    let model = builder.add_stage(
        stage("retinanet", Arc::new(retina), cache_dirpath)
            .with_input_steps([loader])
            .with_adapter(
                Adapter::new()
                    .map("datagen", Source::stage(loader, "datagen"))
                    .map("validation_datagen", validation_datagen),
            )
            .trainable(),
    )?;

    let terminal = match mode {
        Mode::Train => model,
        Mode::Inference => {
            let submission = postprocessing(&mut builder, model, label_encoder, encoder, config)?;
            builder.add_stage(
                stage("output", Arc::new(IdentityOperation::new(["y_pred"])), cache_dirpath)
                    .with_input_steps([submission])
                    .with_adapter(Adapter::new().map(
                        "y_pred",
                        Source::stage(submission, "postprocessed_images"),
                    )),
            )?
        }
    };

    let graph = builder.finish(terminal)?;
    info!(
        pipeline = graph.name(),
        mode = %mode,
        stages = graph.stage_count(),
        terminal = graph.terminal().name(),
        "Compiled pipeline"
    );
    Ok(graph)
}

/// Compiles the training graph.
///
/// # Errors
///
/// See [`retinanet`].
pub fn retinanet_train(config: &PipelineConfig) -> Result<PipelineGraph, GraphError> {
    retinanet(config, Mode::Train)
}

/// Compiles the inference graph.
///
/// # Errors
///
/// See [`retinanet`].
pub fn retinanet_inference(config: &PipelineConfig) -> Result<PipelineGraph, GraphError> {
    retinanet(config, Mode::Inference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SourceDescriptor;

    fn config() -> PipelineConfig {
        PipelineConfig::new("/tmp/retina")
    }

    #[test]
    fn test_preprocessing_shares_encoder() {
        let mut builder = GraphBuilder::new("pre");
        let pre = preprocessing(&mut builder, &config(), Mode::Train).unwrap();

        let stage = builder.stage(pre.label_encoder).unwrap();
        assert!(stage.is_trainable());
        assert_eq!(stage.transformer().name(), pre.encoder.name());
        assert_eq!(builder.stage(pre.loader).unwrap().input_steps(), &[pre.label_encoder]);
    }

    #[test]
    fn test_postprocessing_wiring() {
        let graph = retinanet_inference(&config()).unwrap();
        let descriptor = graph.descriptor();

        let decoder = descriptor.stage("label_decoder").unwrap();
        assert_eq!(decoder.input_steps, vec!["retinanet".to_string()]);
        assert_eq!(decoder.state_dependencies, vec!["label_encoder".to_string()]);
        assert!(decoder.adapter.is_empty());

        let resizer = descriptor.stage("resizer").unwrap();
        assert_eq!(resizer.input_steps, vec!["decoder".to_string()]);
        assert!(resizer.input_data.is_empty());
        assert_eq!(resizer.adapter.len(), 1);
        assert_eq!(
            resizer.adapter.get("results"),
            Some(&SourceDescriptor::StageOutput {
                stage: "decoder".to_string(),
                field: "results".to_string()
            })
        );

        let submission = descriptor.stage("submission_producer").unwrap();
        assert_eq!(
            submission.input_steps,
            vec!["resizer".to_string(), "label_decoder".to_string()]
        );
        assert_eq!(
            submission.adapter.get("results"),
            Some(&SourceDescriptor::StageOutput {
                stage: "resizer".to_string(),
                field: "resized_results".to_string()
            })
        );
        assert_eq!(
            submission.adapter.get("image_ids"),
            Some(&SourceDescriptor::External {
                bundle: "input".to_string(),
                field: "img_ids".to_string()
            })
        );
    }

    #[test]
    fn test_every_stage_shares_artifact_settings() {
        for mode in [Mode::Train, Mode::Inference] {
            let graph = retinanet(&config(), mode).unwrap();
            for stage in graph.stages() {
                assert!(!stage.persist_output(), "{}", stage.name());
                assert!(!stage.load_persisted_output(), "{}", stage.name());
                assert_eq!(stage.experiment_directory(), Path::new("/tmp/retina"));
            }
        }
    }

    #[test]
    fn test_missing_section_fails_compilation() {
        let mut config = config();
        config.retinanet = None;

        let err = retinanet_train(&config).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingConfigSection {
                section: "retinanet".to_string()
            }
        );
    }

    #[test]
    fn test_missing_cache_dirpath_fails_compilation() {
        let mut config = config();
        config.env.cache_dirpath = None;

        assert!(matches!(
            retinanet_inference(&config),
            Err(GraphError::MissingConfigSection { ref section }) if section == "env.cache_dirpath"
        ));
    }
}
