//! Database schema definitions for the galleria catalog.
//!
//! Two logical tables, `files` and `parameters`, plus a `metadata` table.
//! `parameters.file_id` refers to `files.id`; the link is maintained by the
//! catalog (every delete of a file deletes its parameters in the same
//! transaction) rather than by a declared constraint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Columns of `files`, in the order [`crate::storage::Catalog`] reads them.
pub const FILE_COLUMNS: &str = "f.id, f.path, f.name, f.media_kind, f.extension, f.mtime, f.size, \
     f.has_graph, f.favorite, f.width, f.height, f.duration_secs, f.prompt_preview, f.sampler_names";

/// Columns of `parameters`, in read order.
pub const PARAMETER_COLUMNS: &str = "p.file_id, p.sink_index, p.model, p.sampler, p.scheduler, \
     p.cfg, p.steps, p.positive_prompt, p.negative_prompt, p.width, p.height";

/// Fields of a parameter record that can be listed as filter options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetField {
    Model,
    Sampler,
    Scheduler,
}

impl FacetField {
    /// Column name in `parameters`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FacetField::Model => "model",
            FacetField::Sampler => "sampler",
            FacetField::Scheduler => "scheduler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "model" => Some(FacetField::Model),
            "sampler" => Some(FacetField::Sampler),
            "scheduler" => Some(FacetField::Scheduler),
            _ => None,
        }
    }
}

impl fmt::Display for FacetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SQL schema for creating the catalog tables.
pub const SCHEMA_SQL: &str = r#"
-- Files table: one row per cataloged path
CREATE TABLE IF NOT EXISTS files (
    id VARCHAR PRIMARY KEY,
    path VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    media_kind VARCHAR NOT NULL,
    extension VARCHAR NOT NULL,
    mtime BIGINT NOT NULL,
    size BIGINT NOT NULL,
    has_graph BOOLEAN NOT NULL DEFAULT FALSE,
    favorite BOOLEAN NOT NULL DEFAULT FALSE,
    width BIGINT,
    height BIGINT,
    duration_secs DOUBLE,
    prompt_preview VARCHAR,
    sampler_names VARCHAR,
    indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Parameters table: one row per extracted sink
CREATE TABLE IF NOT EXISTS parameters (
    file_id VARCHAR NOT NULL,
    sink_index BIGINT NOT NULL,
    model VARCHAR,
    sampler VARCHAR,
    scheduler VARCHAR,
    cfg DOUBLE,
    steps BIGINT,
    positive_prompt VARCHAR,
    negative_prompt VARCHAR,
    width BIGINT,
    height BIGINT,
    PRIMARY KEY (file_id, sink_index)
);

-- Metadata table: schema version
CREATE TABLE IF NOT EXISTS metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR
);

-- Indexes for filtering and sorting
CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);
CREATE INDEX IF NOT EXISTS idx_files_mtime ON files(mtime);
CREATE INDEX IF NOT EXISTS idx_files_kind ON files(media_kind);
CREATE INDEX IF NOT EXISTS idx_files_favorite ON files(favorite);
CREATE INDEX IF NOT EXISTS idx_params_file ON parameters(file_id);
CREATE INDEX IF NOT EXISTS idx_params_model ON parameters(model);
CREATE INDEX IF NOT EXISTS idx_params_sampler ON parameters(sampler);
CREATE INDEX IF NOT EXISTS idx_params_scheduler ON parameters(scheduler);
CREATE INDEX IF NOT EXISTS idx_params_cfg ON parameters(cfg);
CREATE INDEX IF NOT EXISTS idx_params_steps ON parameters(steps);
CREATE INDEX IF NOT EXISTS idx_params_width ON parameters(width);
CREATE INDEX IF NOT EXISTS idx_params_height ON parameters(height);
"#;

/// Schema version written to `metadata`.
pub const SCHEMA_VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facet_field_roundtrip() {
        for field in [FacetField::Model, FacetField::Sampler, FacetField::Scheduler] {
            assert_eq!(FacetField::parse(field.as_str()), Some(field));
        }
        assert_eq!(FacetField::parse("Model"), Some(FacetField::Model));
        assert_eq!(FacetField::parse("seed"), None);
    }
}
