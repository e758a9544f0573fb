//! Directory walking, change detection and the bounded worker pool.
//!
//! A sync pass is driven by a pure three-way diff between what is on disk
//! (path -> mtime) and what the store remembers (path -> id, mtime).
//!
//! # Features
//!
//! - Multi-threaded stat of walked entries with rayon
//! - `.galleriaignore` files and configured ignore patterns
//! - Extension-based filtering
//! - Fixed-size worker pool that streams per-file results over a channel

use crate::error::ScanError;
use crate::types::{mtime_millis, CachedState, ChangeSet};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::Instant;
use tracing::{debug, warn};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp", "tif", "tiff"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];
pub const OTHER_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "m4a"];

/// Directories that never hold library content.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".galleria/",
    "thumbnails_cache/",
    ".thumbnails/",
    "@eaDir/",
    "__pycache__/",
];

/// Walk settings.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Lowercase extensions, without the dot.
    pub extensions: HashSet<String>,
    /// Extra ignore globs, gitignore syntax.
    pub ignore_patterns: Vec<String>,
    pub include_hidden: bool,
    pub follow_symlinks: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: IMAGE_EXTENSIONS
                .iter()
                .chain(VIDEO_EXTENSIONS)
                .chain(OTHER_EXTENSIONS)
                .map(|e| e.to_string())
                .collect(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            include_hidden: false,
            follow_symlinks: false,
        }
    }
}

/// Stat of one file on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskEntry {
    /// Unix milliseconds.
    pub mtime: i64,
    pub size: u64,
}

/// Result of walking a library root.
#[derive(Clone, Debug, Default)]
pub struct DiskSnapshot {
    pub entries: HashMap<PathBuf, DiskEntry>,

    /// Files skipped by the extension filter.
    pub skipped_count: usize,

    /// Directories and files that could not be read or stat'ed. Cached
    /// entries at or under these paths are neither removed nor re-read.
    pub unreadable: Vec<PathBuf>,

    /// Entries that could not be read or stat'ed.
    pub error_count: usize,

    pub duration_ms: f64,
}

impl DiskSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` sits at or under a path the walk could not read.
    pub fn is_unreadable(&self, path: &Path) -> bool {
        self.unreadable.iter().any(|u| path.starts_with(u))
    }
}

fn has_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_lowercase()))
        .unwrap_or(false)
}

/// Walk `root` and stat every matching file.
pub fn walk(root: &Path, options: &ScanOptions) -> Result<DiskSnapshot, ScanError> {
    let start = Instant::now();

    if !root.is_dir() {
        return Err(ScanError::RootNotFound(root.to_path_buf()));
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(!options.include_hidden)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(options.follow_symlinks)
        .add_custom_ignore_filename(".galleriaignore");

    if !options.ignore_patterns.is_empty() {
        let mut overrides = ignore::overrides::OverrideBuilder::new(root);
        for pattern in &options.ignore_patterns {
            // `!` turns an override glob into an ignore rule.
            if let Err(e) = overrides.add(&format!("!{}", pattern)) {
                warn!(pattern = %pattern, error = %e, "invalid ignore pattern");
            }
        }
        let overrides = overrides
            .build()
            .map_err(|e| ScanError::Walk(e.to_string()))?;
        builder.overrides(overrides);
    }

    let mut unreadable = Vec::new();
    let mut files = Vec::new();
    for entry in builder.build() {
        match entry {
            Ok(entry) => {
                if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                    files.push(entry.into_path());
                }
            }
            Err(e) => {
                debug!(error = %e, "walk entry failed");
                if let Some(path) = unreadable_path(&e, root) {
                    unreadable.push(path);
                }
            }
        }
    }
    let mut error_count = unreadable.len();

    let stats: Vec<Stat> = files
        .into_par_iter()
        .map(|path| {
            if !has_extension(&path, &options.extensions) {
                return Stat::Skipped;
            }
            match fs::metadata(&path) {
                Ok(metadata) => Stat::Found(
                    path,
                    DiskEntry {
                        mtime: mtime_millis(&metadata),
                        size: metadata.len(),
                    },
                ),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "stat failed");
                    Stat::Failed(path)
                }
            }
        })
        .collect();

    let mut entries = HashMap::with_capacity(stats.len());
    let mut skipped_count = 0;
    for stat in stats {
        match stat {
            Stat::Found(path, entry) => {
                entries.insert(path, entry);
            }
            Stat::Skipped => skipped_count += 1,
            Stat::Failed(path) => {
                error_count += 1;
                unreadable.push(path);
            }
        }
    }
    if !unreadable.is_empty() {
        warn!(count = unreadable.len(), "some paths could not be read; their catalog entries are kept");
    }

    Ok(DiskSnapshot {
        entries,
        unreadable,
        skipped_count,
        error_count,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

enum Stat {
    Skipped,
    Failed(PathBuf),
    Found(PathBuf, DiskEntry),
}

/// The path whose contents a walk error hides from the snapshot.
///
/// Ignore-file glob errors hide nothing. An I/O error without a path is
/// charged to the whole root.
fn unreadable_path(err: &ignore::Error, root: &Path) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, err } => {
            let hides = err.io_error().is_some() || matches!(**err, ignore::Error::Loop { .. });
            hides.then(|| path.clone())
        }
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => unreadable_path(err, root),
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        ignore::Error::Io(_) => Some(root.to_path_buf()),
        ignore::Error::Partial(errs) => errs.iter().find_map(|e| unreadable_path(e, root)),
        _ => None,
    }
}

/// Three-way diff of a disk snapshot against the store's last-known state.
///
/// No other state is consulted. Output lists are sorted. Cached paths the
/// walk could not read are counted as unchanged rather than removed.
pub fn diff(snapshot: &DiskSnapshot, cached: &CachedState) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(snapshot.len());

    for (path, entry) in &snapshot.entries {
        let key = path.to_string_lossy().into_owned();
        match cached.get(&key) {
            None => changes.to_add.push(path.clone()),
            Some(c) if c.mtime != entry.mtime => changes.to_update.push(path.clone()),
            Some(_) => changes.unchanged += 1,
        }
        seen.insert(key);
    }

    for (path, entry) in cached {
        if seen.contains(path.as_str()) {
            continue;
        }
        if snapshot.is_unreadable(Path::new(path)) {
            // Not seen this pass, not gone either.
            changes.unchanged += 1;
        } else {
            changes.to_remove.push(entry.id.clone());
        }
    }

    changes.to_add.sort();
    changes.to_update.sort();
    changes.to_remove.sort();
    changes
}

/// Walk and diff in one step.
pub fn scan(root: &Path, options: &ScanOptions, cached: &CachedState) -> Result<ChangeSet, ScanError> {
    let snapshot = walk(root, options)?;
    Ok(diff(&snapshot, cached))
}

/// Fixed-size pool for per-file work.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `threads` workers; 0 means one per available core.
    pub fn new(threads: usize) -> Result<Self, ScanError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("galleria-worker-{i}"))
            .build()
            .map_err(|e| ScanError::WorkerPool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `work` for every path and send each result to `results`.
    ///
    /// Blocks until all started work is done. Once `cancel` is set, paths not
    /// yet started are skipped; work already running finishes and is sent.
    /// Result order is not guaranteed.
    pub fn dispatch<T, F>(&self, paths: &[PathBuf], cancel: &AtomicBool, work: F, results: Sender<(PathBuf, T)>)
    where
        T: Send,
        F: Fn(&Path) -> T + Sync,
    {
        self.pool.install(|| {
            paths.par_iter().for_each_with(results, |tx, path| {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                let out = work(path);
                // The receiver only goes away when the pass is abandoned.
                let _ = tx.send((path.clone(), out));
            });
        });
    }
}
