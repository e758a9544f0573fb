//! Data models shared by the extractor, the scanner and the catalog store.
//!
//! A [`FileRecord`] describes one media file on disk; a [`ParameterRecord`]
//! describes one sampler invocation recovered from the pipeline graph
//! embedded in that file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use xxhash_rust::xxh3::xxh3_128;

/// Coarse media classification derived from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Other => "other",
        }
    }

    /// Parse a stored kind string. Unknown values map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }

    /// Classify by lowercase extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" | "tif" | "tiff" => MediaKind::Image,
            "mp4" | "mov" | "webm" | "mkv" | "avi" | "m4v" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One cataloged file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable id derived from the absolute path (see [`file_id`]).
    pub id: String,

    /// Absolute path as seen by the scanner.
    pub path: String,

    /// File name shown to users.
    pub name: String,

    pub media_kind: MediaKind,

    /// Lowercase extension without the leading dot.
    pub extension: String,

    /// Modification time in unix milliseconds.
    pub mtime: i64,

    /// Size in bytes.
    pub size: u64,

    /// Whether an embedded pipeline graph was found and parsed.
    pub has_graph: bool,

    /// User flag, preserved across re-extraction.
    pub favorite: bool,

    pub width: Option<u32>,
    pub height: Option<u32>,

    /// Container duration for video files.
    pub duration_secs: Option<f64>,

    /// First positive prompt, truncated for list views.
    pub prompt_preview: Option<String>,

    /// Distinct sampler names, joined with ", ".
    pub sampler_names: Option<String>,
}

/// Parameters recovered from a single sink node, before they are bound to a file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkParameters {
    /// Position of the sink in evaluation order, starting at 0.
    pub sink_index: u32,
    pub model: Option<String>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub cfg: Option<f64>,
    pub steps: Option<i64>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl SinkParameters {
    pub fn into_record(self, file_id: &str) -> ParameterRecord {
        ParameterRecord {
            file_id: file_id.to_string(),
            sink_index: self.sink_index,
            model: self.model,
            sampler: self.sampler,
            scheduler: self.scheduler,
            cfg: self.cfg,
            steps: self.steps,
            positive_prompt: self.positive_prompt,
            negative_prompt: self.negative_prompt,
            width: self.width,
            height: self.height,
        }
    }
}

/// One extracted sink, keyed by `(file_id, sink_index)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub file_id: String,
    pub sink_index: u32,
    pub model: Option<String>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub cfg: Option<f64>,
    pub steps: Option<i64>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// What the store remembers about a path from the previous pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedEntry {
    pub id: String,
    pub mtime: i64,
}

/// Last-known store state, keyed by path.
pub type CachedState = HashMap<String, CachedEntry>;

/// Three-way diff between the directory tree and the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Paths on disk that the store has never seen.
    pub to_add: Vec<PathBuf>,

    /// Paths whose mtime differs from the cached one.
    pub to_update: Vec<PathBuf>,

    /// Ids of cached files that are gone from disk.
    pub to_remove: Vec<String>,

    /// Paths present on both sides with the same mtime.
    pub unchanged: usize,
}

impl ChangeSet {
    /// Files that need probing and extraction.
    pub fn pending(&self) -> usize {
        self.to_add.len() + self.to_update.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// Derive the stable file id from an absolute path.
pub fn file_id(path: &Path) -> String {
    format!("{:032x}", xxh3_128(path.to_string_lossy().as_bytes()))
}

/// Modification time of `metadata` in unix milliseconds.
///
/// Timestamps before the epoch come back negative; platforms without mtime yield 0.
pub fn mtime_millis(metadata: &Metadata) -> i64 {
    match metadata.modified() {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        },
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_extension() {
        assert_eq!(MediaKind::from_extension("PNG"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("webp"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("wav"), MediaKind::Other);
        assert_eq!(MediaKind::parse(MediaKind::Video.as_str()), MediaKind::Video);
    }

    #[test]
    fn test_file_id_is_stable_per_path() {
        let a = file_id(Path::new("/library/a.png"));
        let b = file_id(Path::new("/library/b.png"));
        assert_eq!(a, file_id(Path::new("/library/a.png")));
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_change_set_pending() {
        let changes = ChangeSet {
            to_add: vec![PathBuf::from("a.png")],
            to_update: vec![PathBuf::from("b.png")],
            to_remove: vec!["c".to_string()],
            unchanged: 3,
        };
        assert_eq!(changes.pending(), 2);
        assert!(!changes.is_empty());
        assert!(ChangeSet::default().is_empty());
    }
}
