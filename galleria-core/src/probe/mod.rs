//! File probing: media kind, embedded graph bytes, dimensions and duration.
//!
//! The probe is read-only. A file without an embedded document is a normal
//! outcome (`graph: None`), not an error; only I/O failures are errors.
//!
//! # Sources
//!
//! - PNG: `workflow` then `prompt` text chunk
//! - MP4 / MOV: `workflow` then `prompt` metadata tag, else any JSON-looking tag
//! - Everything else: byte scan for an embedded JSON document

pub mod isobmff;
pub mod png;
pub mod scan;

use crate::error::ProbeError;
use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Metadata keys holding a graph document, in priority order.
pub const GRAPH_KEYS: &[&str] = &["workflow", "prompt"];

/// How much of an unrecognized file the fallback scan reads.
const SCAN_LIMIT: u64 = 16 * 1024 * 1024;

/// What the probe learned about one file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub media_kind: MediaKind,
    /// Raw bytes of the embedded document; always valid JSON when present.
    pub graph: Option<Vec<u8>>,
    pub dimensions: Option<(u32, u32)>,
    pub duration_secs: Option<f64>,
}

/// Probe a file on disk.
pub fn probe_file(path: &Path) -> Result<ProbeOutcome, ProbeError> {
    let metadata = std::fs::metadata(path).map_err(|e| ProbeError::io(path, e))?;
    if !metadata.is_file() {
        return Err(ProbeError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let file = File::open(path).map_err(|e| ProbeError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut outcome = probe_reader(&mut reader, &extension).map_err(|e| ProbeError::io(path, e))?;

    if outcome.dimensions.is_none() && outcome.media_kind == MediaKind::Image {
        outcome.dimensions = image::image_dimensions(path).ok();
    }

    debug!(
        path = %path.display(),
        kind = %outcome.media_kind,
        has_graph = outcome.graph.is_some(),
        "probed file"
    );
    Ok(outcome)
}

/// Probe an already opened stream. `extension` is lowercase, without the dot.
pub fn probe_reader<R: Read + Seek>(reader: &mut R, extension: &str) -> std::io::Result<ProbeOutcome> {
    let mut outcome = ProbeOutcome {
        media_kind: MediaKind::from_extension(extension),
        graph: None,
        dimensions: None,
        duration_secs: None,
    };

    if let Some(info) = png::read_info(reader)? {
        outcome.dimensions = info.dimensions;
        outcome.graph = GRAPH_KEYS
            .iter()
            .filter_map(|key| info.field(key))
            .find(|bytes| is_document(bytes))
            .map(<[u8]>::to_vec);
        return Ok(outcome);
    }

    if matches!(extension, "mp4" | "mov" | "m4v") {
        reader.seek(SeekFrom::Start(0))?;
        if let Some(info) = isobmff::read_info(reader)? {
            outcome.dimensions = info.dimensions;
            outcome.duration_secs = info.duration_secs;
            outcome.graph = GRAPH_KEYS
                .iter()
                .filter_map(|key| info.tag(key))
                .chain(info.tags.iter().map(|(_, v)| v.as_slice()))
                .map(trim_text)
                .find(|bytes| bytes.first() == Some(&b'{') && is_document(bytes))
                .map(<[u8]>::to_vec);
            return Ok(outcome);
        }
    }

    reader.seek(SeekFrom::Start(0))?;
    let mut head = Vec::new();
    reader.by_ref().take(SCAN_LIMIT).read_to_end(&mut head)?;
    outcome.graph = scan::find_document(&head).map(<[u8]>::to_vec);
    Ok(outcome)
}

fn is_document(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(bytes).is_ok()
}

/// Strip surrounding whitespace and trailing NULs some muxers append.
fn trim_text(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace() && *b != 0)
        .map_or(0, |i| i + 1);
    let start = bytes[..end]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(end);
    &bytes[start..end]
}
