//! Benchmarks for pipeline compilation and execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use retinaflow::core::Mode;
use retinaflow::pipeline::{retinanet, GraphRunner, PipelineRegistry, RunMode};
use retinaflow::testing::{sample_config, train_bundles, StubDetector};
use std::sync::Arc;

fn compile_benchmark(c: &mut Criterion) {
    let config = sample_config("/tmp/retinaflow-bench");
    let registry = PipelineRegistry::default();

    c.bench_function("compile_train", |b| {
        b.iter(|| black_box(registry.compile("retinanet", Mode::Train, &config)))
    });
    c.bench_function("compile_inference", |b| {
        b.iter(|| black_box(registry.compile("retinanet", Mode::Inference, &config)))
    });

    if let Ok(graph) = retinanet(&config, Mode::Inference) {
        c.bench_function("descriptor_inference", |b| b.iter(|| black_box(graph.descriptor())));
    }
}

fn run_benchmark(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let config = sample_config(dir.path()).with_detection_model(Arc::new(StubDetector::new()));
    let Ok(graph) = retinanet(&config, Mode::Train) else {
        return;
    };
    let bundles = train_bundles();
    let runner = GraphRunner::default();

    c.bench_function("fit_train", |b| {
        b.iter(|| black_box(runtime.block_on(runner.run(&graph, &bundles, RunMode::Fit))))
    });
}

criterion_group!(benches, compile_benchmark, run_benchmark);
criterion_main!(benches);
