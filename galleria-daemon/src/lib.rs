//! galleria daemon library - catalog storage and sync orchestration.
//!
//! This library provides:
//! - Storage layer (DuckDB-based catalog of files and extracted parameters)
//! - Sync coordinator (single-slot incremental passes with progress events)
//! - Configuration loading from `.galleria.toml`

pub mod config;
pub mod storage;
pub mod sync;

pub use config::GalleriaConfig;
pub use storage::{Catalog, StoreError};
pub use sync::{SyncCoordinator, SyncError, SyncEvent, SyncSummary};
