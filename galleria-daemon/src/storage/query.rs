//! Filter and paging types for catalog queries, and the SQL they compile to.
//!
//! Every user value is bound as a parameter; only column names chosen from
//! closed enums are spliced into the statement text.

use duckdb::types::Value;
use galleria_core::{FileRecord, MediaKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page a single query returns.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Inclusive range filter. An unset side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Bounds<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Predicates for [`crate::storage::Catalog::query`]. All set predicates must hold.
///
/// Model, sampler, scheduler and the numeric ranges are matched against a
/// single parameter record: a file matches when one of its sinks satisfies
/// all of them together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilters {
    pub favorites_only: bool,
    pub media_kind: Option<MediaKind>,
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    pub has_graph: Option<bool>,
    pub model: Option<String>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub cfg: Bounds<f64>,
    pub steps: Bounds<i64>,
    pub width: Bounds<i64>,
    pub height: Bounds<i64>,
    /// Case-insensitive substring match over file name and prompts.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Mtime,
    Name,
    Size,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::Mtime => "f.mtime",
            SortField::Name => "f.name",
            SortField::Size => "f.size",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mtime" | "modified" | "date" => Some(SortField::Mtime),
            "name" => Some(SortField::Name),
            "size" => Some(SortField::Size),
            _ => None,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortField::Mtime => "mtime",
            SortField::Name => "name",
            SortField::Size => "size",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Which slice of the ordered result to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    pub sort: SortField,
    pub order: SortOrder,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
            sort: SortField::default(),
            order: SortOrder::default(),
        }
    }
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..Self::default()
        }
    }

    /// Limit clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    pub records: Vec<FileRecord>,
    /// Matches across all pages.
    pub total_count: u64,
    pub has_more: bool,
}

/// A `WHERE` clause and its bound values.
#[derive(Debug, Default)]
pub(crate) struct WhereClause {
    pub sql: String,
    pub values: Vec<Value>,
}

impl QueryFilters {
    /// Compile the filters against `files f`. Returns an empty clause when no
    /// predicate is set.
    pub(crate) fn where_clause(&self) -> WhereClause {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if self.favorites_only {
            conditions.push("f.favorite".to_string());
        }
        if let Some(kind) = self.media_kind {
            conditions.push("f.media_kind = ?".to_string());
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if !self.extensions.is_empty() {
            let placeholders = vec!["?"; self.extensions.len()].join(", ");
            conditions.push(format!("f.extension IN ({})", placeholders));
            values.extend(
                self.extensions
                    .iter()
                    .map(|e| Value::Text(e.trim_start_matches('.').to_lowercase())),
            );
        }
        if let Some(has_graph) = self.has_graph {
            conditions.push("f.has_graph = ?".to_string());
            values.push(Value::Boolean(has_graph));
        }

        let mut param_conditions: Vec<String> = Vec::new();
        for (column, value) in [
            ("model", &self.model),
            ("sampler", &self.sampler),
            ("scheduler", &self.scheduler),
        ] {
            if let Some(value) = value {
                param_conditions.push(format!("p.{} = ?", column));
                values.push(Value::Text(value.clone()));
            }
        }
        push_bounds(&mut param_conditions, &mut values, "p.cfg", &self.cfg, Value::Double);
        for (column, bounds) in [
            ("p.steps", &self.steps),
            ("p.width", &self.width),
            ("p.height", &self.height),
        ] {
            push_bounds(&mut param_conditions, &mut values, column, bounds, Value::BigInt);
        }
        if !param_conditions.is_empty() {
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM parameters p WHERE p.file_id = f.id AND {})",
                param_conditions.join(" AND ")
            ));
        }

        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            conditions.push(
                "(contains(lower(f.name), ?) OR EXISTS (SELECT 1 FROM parameters p \
                 WHERE p.file_id = f.id AND (contains(lower(p.positive_prompt), ?) \
                 OR contains(lower(p.negative_prompt), ?))))"
                    .to_string(),
            );
            values.extend(std::iter::repeat(Value::Text(needle)).take(3));
        }

        if conditions.is_empty() {
            return WhereClause::default();
        }
        WhereClause {
            sql: format!(" WHERE {}", conditions.join(" AND ")),
            values,
        }
    }
}

fn push_bounds<T: Copy>(
    conditions: &mut Vec<String>,
    values: &mut Vec<Value>,
    column: &str,
    bounds: &Bounds<T>,
    wrap: fn(T) -> Value,
) {
    if let Some(min) = bounds.min {
        conditions.push(format!("{} >= ?", column));
        values.push(wrap(min));
    }
    if let Some(max) = bounds.max {
        conditions.push(format!("{} <= ?", column));
        values.push(wrap(max));
    }
}

impl PageRequest {
    /// `ORDER BY` clause; ties always break on id so paging is stable.
    pub(crate) fn order_clause(&self) -> String {
        format!(
            " ORDER BY {} {}, f.id ASC",
            self.sort.column(),
            self.order.keyword()
        )
    }
}
