//! Per-file processing: probe, parse, extract, and build the catalog rows.

use crate::error::ProbeError;
use crate::extractor;
use crate::graph::GraphModel;
use crate::probe;
use crate::registry::NodeRegistry;
use crate::types::{file_id, mtime_millis, FileRecord, ParameterRecord};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Maximum length, in characters, of the prompt preview stored on a file.
pub const PROMPT_PREVIEW_CHARS: usize = 150;

/// Everything the store needs for one file, written as a single unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestedFile {
    pub record: FileRecord,
    pub parameters: Vec<ParameterRecord>,
}

/// Probe `path` and extract its parameters.
///
/// Only an unreadable file is an error. A file with no document, or with a
/// document that is not a usable graph, comes back with `has_graph = false`
/// and no parameters.
pub fn process_file(path: &Path, registry: &NodeRegistry) -> Result<IngestedFile, ProbeError> {
    let metadata = std::fs::metadata(path).map_err(|e| ProbeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let outcome = probe::probe_file(path)?;

    let id = file_id(path);
    let (has_graph, parameters) = match outcome.graph.as_deref() {
        None => (false, Vec::new()),
        Some(bytes) => match GraphModel::parse(bytes, registry) {
            Ok(graph) => {
                let sinks = extractor::extract(&graph, registry);
                debug!(path = %path.display(), nodes = graph.len(), sinks = sinks.len(), "extracted graph");
                (true, sinks.into_iter().map(|s| s.into_record(&id)).collect())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "embedded graph is malformed");
                (false, Vec::new())
            }
        },
    };

    let record = FileRecord {
        id,
        path: path.to_string_lossy().into_owned(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        media_kind: outcome.media_kind,
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
        mtime: mtime_millis(&metadata),
        size: metadata.len(),
        has_graph,
        favorite: false,
        width: outcome.dimensions.map(|(w, _)| w),
        height: outcome.dimensions.map(|(_, h)| h),
        duration_secs: outcome.duration_secs,
        prompt_preview: prompt_preview(&parameters),
        sampler_names: sampler_names(&parameters),
    };

    Ok(IngestedFile { record, parameters })
}

fn prompt_preview(parameters: &[ParameterRecord]) -> Option<String> {
    parameters
        .iter()
        .find_map(|p| p.positive_prompt.as_deref())
        .map(|text| text.chars().take(PROMPT_PREVIEW_CHARS).collect())
}

fn sampler_names(parameters: &[ParameterRecord]) -> Option<String> {
    let mut names: Vec<&str> = Vec::new();
    for name in parameters.iter().filter_map(|p| p.sampler.as_deref()) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    (!names.is_empty()).then(|| names.join(", "))
}
