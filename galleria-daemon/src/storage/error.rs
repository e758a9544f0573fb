//! Storage errors.

use thiserror::Error;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the catalog store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// DuckDB rejected a statement or a transaction.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// The catalog directory could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No file with this id.
    #[error("File not found: {id}")]
    NotFound {
        /// Requested id.
        id: String,
    },

    /// A write was attempted on a catalog opened read-only.
    #[error("Catalog is open read-only")]
    ReadOnly,

    /// The catalog was created by an incompatible version.
    #[error("Unsupported catalog schema version {found} (expected {expected})")]
    SchemaVersion {
        /// Version recorded in the catalog.
        found: String,
        /// Version this build writes.
        expected: String,
    },
}
