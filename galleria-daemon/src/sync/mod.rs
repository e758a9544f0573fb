//! Sync passes: scan, extract, and write to the catalog.
//!
//! A pass runs as Scanner → FileProbe → GraphModel → Extractor → Catalog.
//! At most one pass is in flight per [`SyncCoordinator`]; progress and
//! lifecycle events are published while it runs.

mod coordinator;

pub use coordinator::{SyncCoordinator, SyncRun};

use chrono::{DateTime, Utc};
use galleria_core::ScanError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StoreError;

/// Errors that end a sync pass. Per-file failures never do; they are
/// counted in [`SyncSummary::failed`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A sync is already running (run {0})")]
    AlreadyRunning(Uuid),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Catalog error: {0}")]
    Store(#[from] StoreError),

    /// The pass's worker thread panicked or was aborted.
    #[error("Sync task failed: {0}")]
    Join(String),
}

/// Single-slot coordinator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Running {
        run_id: Uuid,
        root: PathBuf,
        started_at: DateTime<Utc>,
    },
    /// The last pass ended with an error. A new pass may start.
    Failed { error: String, at: DateTime<Utc> },
}

impl SyncState {
    pub fn is_running(&self) -> bool {
        matches!(self, SyncState::Running { .. })
    }
}

/// Phase of the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Scanning,
    Removing,
    Extracting,
    Completed,
    Cancelled,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Scanning => "scanning",
            SyncStatus::Removing => "removing",
            SyncStatus::Extracting => "extracting",
            SyncStatus::Completed => "completed",
            SyncStatus::Cancelled => "cancelled",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Files handled so far out of the files needing extraction.
/// `processed` never decreases within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncProgress {
    pub processed: usize,
    pub total: usize,
    pub status: SyncStatus,
}

/// Counters for one finished pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Files whose probe or catalog write failed this pass.
    pub failed: usize,
    /// Catalog rows written or removed by this pass.
    pub written: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Events published during a pass, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        run_id: Uuid,
        root: PathBuf,
    },
    Scanned {
        to_add: usize,
        to_update: usize,
        to_remove: usize,
        unchanged: usize,
    },
    Progress(SyncProgress),
    FileFailed {
        path: PathBuf,
        error: String,
    },
    Completed(SyncSummary),
    Cancelled(SyncSummary),
    Failed {
        error: String,
    },
}

impl SyncEvent {
    /// Whether this event ends the pass.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncEvent::Completed(_) | SyncEvent::Cancelled(_) | SyncEvent::Failed { .. }
        )
    }
}
