//! Storage layer for the galleria catalog.
//!
//! Provides a DuckDB-based store with:
//! - Schema management
//! - Transactional per-file upsert (file row plus parameter rows)
//! - Filtered, paginated queries and facet listings
//! - Favorite flags that survive re-extraction

mod catalog;
mod error;
pub mod query;
mod schema;

pub use catalog::{AccessMode, Catalog, CatalogStats, FacetCount, FileDetail, FilterOptions, NumericRange};
pub use error::{Result, StoreError};
pub use query::{Bounds, PageRequest, QueryFilters, QueryPage, SortField, SortOrder};
pub use schema::{FacetField, SCHEMA_VERSION};

#[cfg(test)]
pub(crate) use catalog::faults;
