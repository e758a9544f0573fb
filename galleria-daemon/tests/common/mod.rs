//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// One-sampler pipeline in the id-keyed shape.
pub const SINGLE_SAMPLER: &str = r#"{
    "3": {"class_type": "KSampler", "inputs": {
        "seed": 1234, "steps": 30, "cfg": 7.5, "sampler_name": "euler", "scheduler": "normal",
        "denoise": 1.0, "model": ["4", 0], "positive": ["6", 0], "negative": ["7", 0],
        "latent_image": ["5", 0]}},
    "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "m.safetensors"}},
    "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 832, "height": 1216, "batch_size": 1}},
    "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a lighthouse in fog", "clip": ["4", 1]}},
    "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "blurry", "clip": ["4", 1]}}
}"#;

/// Base pass followed by a refine pass, in the explicit-link shape.
pub const REFINE_CHAIN: &str = r#"{
    "nodes": [
        {"id": 4, "type": "CheckpointLoaderSimple", "order": 0, "mode": 0,
         "widgets_values": ["base.safetensors"]},
        {"id": 5, "type": "EmptyLatentImage", "order": 1, "mode": 0,
         "widgets_values": [1024, 1024, 1]},
        {"id": 6, "type": "CLIPTextEncode", "order": 2, "mode": 0,
         "widgets_values": ["a red fox"]},
        {"id": 10, "type": "KSampler", "order": 3, "mode": 0,
         "inputs": [{"name": "model", "link": 1}, {"name": "positive", "link": 2},
                    {"name": "latent_image", "link": 3}],
         "widgets_values": [1, "fixed", 30, 7.5, "euler", "normal", 1.0]},
        {"id": 11, "type": "KSampler", "order": 4, "mode": 0,
         "inputs": [{"name": "model", "link": 4}, {"name": "positive", "link": 5},
                    {"name": "latent_image", "link": 6}],
         "widgets_values": [2, "fixed", 12, 4.0, "dpmpp_2m", "karras", 0.4]}
    ],
    "links": [
        [1, 4, 0, 10, 0, "MODEL"],
        [2, 6, 0, 10, 1, "CONDITIONING"],
        [3, 5, 0, 10, 3, "LATENT"],
        [4, 4, 0, 11, 0, "MODEL"],
        [5, 6, 0, 11, 1, "CONDITIONING"],
        [6, 10, 0, 11, 3, "LATENT"]
    ]
}"#;

/// Minimal PNG with the given text chunks. CRCs are zero; the probe does
/// not check them.
pub fn png_with_text(width: u32, height: u32, text: &[(&str, &str)]) -> Vec<u8> {
    fn chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0, 0, 0, 0]);
    }

    let mut out = b"\x89PNG\r\n\x1a\n".to_vec();
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    chunk(&mut out, b"IHDR", &ihdr);
    for (key, value) in text {
        let mut data = key.as_bytes().to_vec();
        data.push(0);
        data.extend_from_slice(value.as_bytes());
        chunk(&mut out, b"tEXt", &data);
    }
    chunk(&mut out, b"IEND", &[]);
    out
}

/// Write a PNG carrying `graph` under the `prompt` keyword.
pub fn write_graph_png(dir: &Path, name: &str, graph: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, png_with_text(512, 512, &[("prompt", graph)]))
        .expect("Failed to write fixture");
    path
}
