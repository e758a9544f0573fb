//! Benchmark for graph parsing and parameter extraction.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use galleria_core::extractor::extract;
use galleria_core::{GraphModel, NodeRegistry};
use serde_json::{json, Value};

/// A refine pipeline with a LoRA stack, repeated `stages` times.
fn pipeline(stages: usize) -> Value {
    let mut doc = serde_json::Map::new();
    doc.insert(
        "1".into(),
        json!({"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sdxl.safetensors"}}),
    );
    doc.insert(
        "2".into(),
        json!({"class_type": "EmptyLatentImage", "inputs": {"width": 1024, "height": 1024, "batch_size": 1}}),
    );
    let mut model = "1".to_string();
    let mut latent = "2".to_string();
    for stage in 0..stages {
        let base = 10 + stage * 10;
        let lora = base.to_string();
        doc.insert(
            lora.clone(),
            json!({"class_type": "LoraLoader", "inputs": {"model": [model, 0], "clip": ["1", 1], "lora_name": "x"}}),
        );
        doc.insert(
            (base + 1).to_string(),
            json!({"class_type": "CLIPTextEncode", "inputs": {"text": format!("stage {stage}"), "clip": [lora.clone(), 1]}}),
        );
        doc.insert(
            (base + 2).to_string(),
            json!({"class_type": "KSampler", "inputs": {
                "model": [lora.clone(), 0], "positive": [(base + 1).to_string(), 0], "negative": [(base + 1).to_string(), 0],
                "latent_image": [latent, 0], "steps": 20 + stage, "cfg": 7.0, "sampler_name": "euler", "scheduler": "normal"}}),
        );
        model = lora;
        latent = (base + 2).to_string();
    }
    Value::Object(doc)
}

fn bench_parse_and_extract(c: &mut Criterion) {
    let registry = NodeRegistry::builtin();
    let bytes = serde_json::to_vec(&pipeline(4)).unwrap();

    c.bench_function("parse_and_extract_4_stage", |b| {
        b.iter(|| {
            let graph = GraphModel::parse(black_box(&bytes), &registry).unwrap();
            black_box(extract(&graph, &registry))
        })
    });
}

fn bench_extract_large_graph(c: &mut Criterion) {
    let registry = NodeRegistry::builtin();
    let graph = GraphModel::from_value(pipeline(64), &registry).unwrap();

    c.bench_function("extract_64_sinks", |b| b.iter(|| black_box(extract(&graph, &registry))));
}

criterion_group!(benches, bench_parse_and_extract, bench_extract_large_graph);
criterion_main!(benches);
