//! Error types for galleria-core.

use std::path::PathBuf;
use thiserror::Error;

/// A file could not be read. The sync skips the file and moves on.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The file could not be opened, stat'ed or read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path exists but is not a regular file.
    #[error("Not a regular file: {path}")]
    NotAFile {
        /// Offending path.
        path: PathBuf,
    },
}

impl ProbeError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ProbeError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Embedded graph bytes that do not form a usable document.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Not valid JSON, or valid JSON whose root is not an object.
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::MalformedGraph(e.to_string())
    }
}

/// Errors raised while walking a library root.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The root does not exist or is not a directory.
    #[error("Library root not found: {0}")]
    RootNotFound(PathBuf),

    /// The walker itself failed (not a single entry).
    #[error("Directory walk failed: {0}")]
    Walk(String),

    /// The bounded worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),
}
