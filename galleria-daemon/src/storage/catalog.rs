//! Catalog - DuckDB-backed store for file and parameter records.

use duckdb::{params, params_from_iter, Config, Connection, OptionalExt, Row};
use galleria_core::{CachedEntry, CachedState, FileRecord, IngestedFile, MediaKind, ParameterRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::error::{Result, StoreError};
use super::query::{PageRequest, QueryFilters, QueryPage};
use super::schema::{FacetField, FILE_COLUMNS, PARAMETER_COLUMNS, SCHEMA_SQL, SCHEMA_VERSION};

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write mode (owns the writer connection)
    #[default]
    ReadWrite,
    /// Read-only mode (inspection while another process may write)
    ReadOnly,
}

/// A file together with its extracted parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDetail {
    pub file: FileRecord,
    pub parameters: Vec<ParameterRecord>,
}

/// A distinct value and the number of files using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub files: u64,
}

/// Observed minimum and maximum of a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange<T> {
    pub min: T,
    pub max: T,
}

/// Values a filter UI can offer, derived from what is cataloged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub models: Vec<FacetCount>,
    pub samplers: Vec<FacetCount>,
    pub schedulers: Vec<FacetCount>,
    pub extensions: Vec<FacetCount>,
    pub cfg: Option<NumericRange<f64>>,
    pub steps: Option<NumericRange<i64>>,
    pub width: Option<NumericRange<i64>>,
    pub height: Option<NumericRange<i64>>,
}

/// Catalog-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub files: u64,
    pub with_graph: u64,
    pub favorites: u64,
    pub parameters: u64,
    pub total_bytes: u64,
    pub by_kind: BTreeMap<String, u64>,
}

/// The catalog store.
///
/// Writes go through a single writer connection; reads use a second
/// connection to the same database, so a query never waits on the writer's
/// mutex and each read transaction sees one committed snapshot.
pub struct Catalog {
    writer: Option<Mutex<Connection>>,
    reader: Mutex<Connection>,
    path: Option<PathBuf>,
    writes: AtomicU64,
}

impl Catalog {
    /// Open or create a catalog in read-write mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadWrite)
    }

    /// Open an existing catalog in read-only mode. Every write returns
    /// [`StoreError::ReadOnly`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadOnly)
    }

    /// Open a catalog with the specified access mode.
    pub fn open_with_mode(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref();
        let catalog = match mode {
            AccessMode::ReadWrite => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Self::from_writer(Connection::open(path)?, Some(path.to_path_buf()))?
            }
            AccessMode::ReadOnly => {
                let config = Config::default().access_mode(duckdb::AccessMode::ReadOnly)?;
                Self {
                    writer: None,
                    reader: Mutex::new(Connection::open_with_flags(path, config)?),
                    path: Some(path.to_path_buf()),
                    writes: AtomicU64::new(0),
                }
            }
        };
        debug!(path = %path.display(), ?mode, "opened catalog");
        Ok(catalog)
    }

    /// Create a private in-memory catalog.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_writer(Connection::open_in_memory()?, None)
    }

    fn from_writer(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        init_schema(&conn)?;
        let reader = conn.try_clone()?;
        Ok(Self {
            writer: Some(Mutex::new(conn)),
            reader: Mutex::new(reader),
            path,
            writes: AtomicU64::new(0),
        })
    }

    /// Database file, or `None` for an in-memory catalog.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// Number of committed write transactions since this catalog was opened.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        let writer = self.writer.as_ref().ok_or(StoreError::ReadOnly)?;
        Ok(lock(writer))
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        lock(&self.reader)
    }

    fn committed(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Path → (id, mtime) for every cataloged file.
    pub fn cached_entries(&self) -> Result<CachedState> {
        let conn = self.reader();
        let mut stmt = conn.prepare("SELECT path, id, mtime FROM files")?;
        let mut rows = stmt.query([])?;
        let mut cached = CachedState::new();
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            cached.insert(
                path,
                CachedEntry {
                    id: row.get(1)?,
                    mtime: row.get(2)?,
                },
            );
        }
        Ok(cached)
    }

    /// Write a file and its parameters as one transaction.
    ///
    /// An existing row keeps its `favorite` flag; its parameter rows are
    /// replaced wholesale.
    pub fn upsert_file(&self, ingested: &IngestedFile) -> Result<()> {
        let file = &ingested.record;
        let mut conn = self.writer()?;
        #[cfg(test)]
        faults::check(&[file.id.as_str()])?;
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM files WHERE id = ?", params![file.id], |_| Ok(()))
            .optional()?
            .is_some();

        if exists {
            tx.execute(
                r#"UPDATE files SET path = ?, name = ?, media_kind = ?, extension = ?, mtime = ?,
                   size = ?, has_graph = ?, width = ?, height = ?, duration_secs = ?,
                   prompt_preview = ?, sampler_names = ?, indexed_at = CURRENT_TIMESTAMP
                   WHERE id = ?"#,
                params![
                    file.path,
                    file.name,
                    file.media_kind.as_str(),
                    file.extension,
                    file.mtime,
                    file.size as i64,
                    file.has_graph,
                    file.width.map(i64::from),
                    file.height.map(i64::from),
                    file.duration_secs,
                    file.prompt_preview,
                    file.sampler_names,
                    file.id,
                ],
            )?;
        } else {
            tx.execute(
                r#"INSERT INTO files
                   (id, path, name, media_kind, extension, mtime, size, has_graph, favorite,
                    width, height, duration_secs, prompt_preview, sampler_names)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    file.id,
                    file.path,
                    file.name,
                    file.media_kind.as_str(),
                    file.extension,
                    file.mtime,
                    file.size as i64,
                    file.has_graph,
                    file.favorite,
                    file.width.map(i64::from),
                    file.height.map(i64::from),
                    file.duration_secs,
                    file.prompt_preview,
                    file.sampler_names,
                ],
            )?;
        }

        tx.execute("DELETE FROM parameters WHERE file_id = ?", params![file.id])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO parameters
                   (file_id, sink_index, model, sampler, scheduler, cfg, steps,
                    positive_prompt, negative_prompt, width, height)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for p in &ingested.parameters {
                stmt.execute(params![
                    file.id,
                    i64::from(p.sink_index),
                    p.model,
                    p.sampler,
                    p.scheduler,
                    p.cfg,
                    p.steps,
                    p.positive_prompt,
                    p.negative_prompt,
                    p.width,
                    p.height,
                ])?;
            }
        }

        tx.commit()?;
        self.committed();
        debug!(id = %file.id, parameters = ingested.parameters.len(), updated = exists, "upserted file");
        Ok(())
    }

    /// Remove files and their parameters. Returns how many files were removed;
    /// unknown ids are ignored.
    pub fn delete_files(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.writer()?;
        #[cfg(test)]
        faults::check(&ids.iter().map(String::as_str).collect::<Vec<_>>())?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut params_stmt = tx.prepare("DELETE FROM parameters WHERE file_id = ?")?;
            let mut files_stmt = tx.prepare("DELETE FROM files WHERE id = ?")?;
            for id in ids {
                params_stmt.execute(params![id])?;
                deleted += files_stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        self.committed();
        debug!(requested = ids.len(), deleted, "deleted files");
        Ok(deleted)
    }

    /// A file and its parameters, read from one snapshot.
    pub fn get_file(&self, id: &str) -> Result<Option<FileDetail>> {
        let mut conn = self.reader();
        let tx = conn.transaction()?;
        let file = tx
            .query_row(
                &format!("SELECT {} FROM files f WHERE f.id = ?", FILE_COLUMNS),
                params![id],
                file_from_row,
            )
            .optional()?;
        let detail = match file {
            Some(file) => Some(FileDetail {
                parameters: select_parameters(&tx, id)?,
                file,
            }),
            None => None,
        };
        tx.commit()?;
        Ok(detail)
    }

    /// Parameter records of one file, in sink order.
    pub fn parameters_for(&self, id: &str) -> Result<Vec<ParameterRecord>> {
        let conn = self.reader();
        select_parameters(&conn, id)
    }

    /// Flip the favorite flag and return its new value.
    pub fn toggle_favorite(&self, id: &str) -> Result<bool> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE files SET favorite = NOT favorite WHERE id = ?",
            params![id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let favorite: bool =
            tx.query_row("SELECT favorite FROM files WHERE id = ?", params![id], |row| row.get(0))?;
        tx.commit()?;
        self.committed();
        Ok(favorite)
    }

    /// Set the favorite flag on many files. Returns how many rows matched.
    pub fn set_favorite(&self, ids: &[String], favorite: bool) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE files SET favorite = ? WHERE id = ?")?;
            for id in ids {
                updated += stmt.execute(params![favorite, id])?;
            }
        }
        tx.commit()?;
        self.committed();
        Ok(updated)
    }

    /// One page of files matching `filters`, with the total match count.
    pub fn query(&self, filters: &QueryFilters, page: &PageRequest) -> Result<QueryPage> {
        let clause = filters.where_clause();
        let limit = page.effective_limit();

        let mut conn = self.reader();
        let tx = conn.transaction()?;

        let total: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM files f{}", clause.sql),
            params_from_iter(clause.values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM files f{}{} LIMIT {} OFFSET {}",
            FILE_COLUMNS,
            clause.sql,
            page.order_clause(),
            limit,
            page.offset
        );
        let records = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(clause.values.iter()), file_from_row)?;
            rows.collect::<duckdb::Result<Vec<_>>>()?
        };
        tx.commit()?;

        let total_count = total.max(0) as u64;
        let has_more = ((page.offset + records.len()) as u64) < total_count;
        Ok(QueryPage {
            records,
            total_count,
            has_more,
        })
    }

    /// Distinct facet values and numeric ranges across the catalog.
    pub fn filter_options(&self) -> Result<FilterOptions> {
        let mut conn = self.reader();
        let tx = conn.transaction()?;

        let facet = |field: FacetField| -> Result<Vec<FacetCount>> {
            let column = field.as_str();
            counts(
                &tx,
                &format!(
                    "SELECT {c}, COUNT(DISTINCT file_id) FROM parameters WHERE {c} IS NOT NULL \
                     GROUP BY {c} ORDER BY 2 DESC, 1",
                    c = column
                ),
            )
        };
        let models = facet(FacetField::Model)?;
        let samplers = facet(FacetField::Sampler)?;
        let schedulers = facet(FacetField::Scheduler)?;
        let extensions = counts(
            &tx,
            "SELECT extension, COUNT(*) FROM files GROUP BY extension ORDER BY 2 DESC, 1",
        )?;

        let (cfg, steps, width, height) = tx.query_row(
            "SELECT MIN(cfg), MAX(cfg), MIN(steps), MAX(steps), MIN(width), MAX(width), \
             MIN(height), MAX(height) FROM parameters",
            [],
            |row| {
                Ok((
                    range(row.get(0)?, row.get(1)?),
                    range(row.get(2)?, row.get(3)?),
                    range(row.get(4)?, row.get(5)?),
                    range(row.get(6)?, row.get(7)?),
                ))
            },
        )?;
        tx.commit()?;

        Ok(FilterOptions {
            models,
            samplers,
            schedulers,
            extensions,
            cfg,
            steps,
            width,
            height,
        })
    }

    /// Get catalog statistics.
    pub fn stats(&self) -> Result<CatalogStats> {
        let mut conn = self.reader();
        let tx = conn.transaction()?;

        let (files, with_graph, favorites, total_bytes): (i64, i64, i64, i64) = tx.query_row(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE has_graph), COUNT(*) FILTER (WHERE favorite), \
             CAST(COALESCE(SUM(size), 0) AS BIGINT) FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let parameters: i64 = tx.query_row("SELECT COUNT(*) FROM parameters", [], |row| row.get(0))?;

        let mut by_kind = BTreeMap::new();
        for FacetCount { value, files } in
            counts(&tx, "SELECT media_kind, COUNT(*) FROM files GROUP BY media_kind")?
        {
            by_kind.insert(value, files);
        }
        tx.commit()?;

        Ok(CatalogStats {
            files: files.max(0) as u64,
            with_graph: with_graph.max(0) as u64,
            favorites: favorites.max(0) as u64,
            parameters: parameters.max(0) as u64,
            total_bytes: total_bytes.max(0) as u64,
            by_kind,
        })
    }
}

/// Acquire a connection lock, recovering from a poisoned mutex.
/// The connection itself is still usable after a panicking holder.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Recovering from poisoned catalog mutex");
            poisoned.into_inner()
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let found: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(found) if found != SCHEMA_VERSION => Err(StoreError::SchemaVersion {
            found,
            expected: SCHEMA_VERSION.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION],
            )?;
            Ok(())
        }
    }
}

fn select_parameters(conn: &Connection, id: &str) -> Result<Vec<ParameterRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM parameters p WHERE p.file_id = ? ORDER BY p.sink_index",
        PARAMETER_COLUMNS
    ))?;
    let rows = stmt.query_map(params![id], parameter_from_row)?;
    Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
}

fn counts(conn: &Connection, sql: &str) -> Result<Vec<FacetCount>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let files: i64 = row.get(1)?;
        out.push(FacetCount {
            value: row.get(0)?,
            files: files.max(0) as u64,
        });
    }
    Ok(out)
}

fn range<T>(min: Option<T>, max: Option<T>) -> Option<NumericRange<T>> {
    Some(NumericRange { min: min?, max: max? })
}

fn file_from_row(row: &Row<'_>) -> duckdb::Result<FileRecord> {
    let kind: String = row.get(3)?;
    let size: i64 = row.get(6)?;
    let width: Option<i64> = row.get(9)?;
    let height: Option<i64> = row.get(10)?;
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        media_kind: MediaKind::parse(&kind),
        extension: row.get(4)?,
        mtime: row.get(5)?,
        size: size.max(0) as u64,
        has_graph: row.get(7)?,
        favorite: row.get(8)?,
        width: width.and_then(|w| u32::try_from(w).ok()),
        height: height.and_then(|h| u32::try_from(h).ok()),
        duration_secs: row.get(11)?,
        prompt_preview: row.get(12)?,
        sampler_names: row.get(13)?,
    })
}

fn parameter_from_row(row: &Row<'_>) -> duckdb::Result<ParameterRecord> {
    let sink_index: i64 = row.get(1)?;
    Ok(ParameterRecord {
        file_id: row.get(0)?,
        sink_index: u32::try_from(sink_index).unwrap_or_default(),
        model: row.get(2)?,
        sampler: row.get(3)?,
        scheduler: row.get(4)?,
        cfg: row.get(5)?,
        steps: row.get(6)?,
        positive_prompt: row.get(7)?,
        negative_prompt: row.get(8)?,
        width: row.get(9)?,
        height: row.get(10)?,
    })
}

/// Scripted write failures for exercising the sync retry path.
#[cfg(test)]
pub(crate) mod faults {
    use super::StoreError;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// `(file id, failures left)`; ids are unique per test library.
    static SCRIPTED: Mutex<Vec<(String, usize)>> = Mutex::new(Vec::new());

    fn scripted() -> MutexGuard<'static, Vec<(String, usize)>> {
        SCRIPTED.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `times` writes that touch `id`.
    pub(crate) fn fail_writes(id: &str, times: usize) {
        scripted().push((id.to_string(), times));
    }

    pub(super) fn check(ids: &[&str]) -> Result<(), StoreError> {
        let mut scripted = scripted();
        if let Some(entry) = scripted
            .iter_mut()
            .find(|(id, left)| *left > 0 && ids.contains(&id.as_str()))
        {
            entry.1 -= 1;
            return Err(StoreError::Io(std::io::Error::other(format!(
                "scripted write failure for {}",
                entry.0
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::query::{Bounds, SortField, SortOrder};
    use tempfile::TempDir;

    fn record(name: &str, mtime: i64) -> FileRecord {
        let path = format!("/library/{}", name);
        FileRecord {
            id: galleria_core::types::file_id(Path::new(&path)),
            path,
            name: name.to_string(),
            media_kind: MediaKind::from_extension(name.rsplit('.').next().unwrap_or_default()),
            extension: name.rsplit('.').next().unwrap_or_default().to_string(),
            mtime,
            size: 1024,
            has_graph: false,
            favorite: false,
            width: Some(512),
            height: Some(768),
            duration_secs: None,
            prompt_preview: None,
            sampler_names: None,
        }
    }

    fn param(file: &FileRecord, sink_index: u32, model: &str, cfg: f64, steps: i64, prompt: &str) -> ParameterRecord {
        ParameterRecord {
            file_id: file.id.clone(),
            sink_index,
            model: Some(model.to_string()),
            sampler: Some("euler".to_string()),
            scheduler: Some("normal".to_string()),
            cfg: Some(cfg),
            steps: Some(steps),
            positive_prompt: Some(prompt.to_string()),
            negative_prompt: None,
            width: Some(1024),
            height: Some(1024),
        }
    }

    fn with_graph(mut file: FileRecord, parameters: Vec<ParameterRecord>) -> IngestedFile {
        file.has_graph = true;
        IngestedFile { record: file, parameters }
    }

    fn seeded() -> (Catalog, Vec<String>) {
        let catalog = Catalog::open_in_memory().unwrap();
        let a = record("harbor.png", 3_000);
        let b = record("forest.png", 2_000);
        let c = record("clip.mp4", 1_000);
        let ids = vec![a.id.clone(), b.id.clone(), c.id.clone()];

        let pa = vec![
            param(&a, 0, "sdxl.safetensors", 7.5, 30, "A quiet harbor at dawn"),
            param(&a, 1, "refiner.safetensors", 4.0, 10, "A quiet harbor at dawn"),
        ];
        let pb = vec![param(&b, 0, "sd15.ckpt", 6.0, 20, "dense forest")];
        catalog.upsert_file(&with_graph(a, pa)).unwrap();
        catalog.upsert_file(&with_graph(b, pb)).unwrap();
        catalog
            .upsert_file(&IngestedFile { record: c, parameters: vec![] })
            .unwrap();
        (catalog, ids)
    }

    #[test]
    fn test_upsert_and_get() {
        let (catalog, ids) = seeded();
        let detail = catalog.get_file(&ids[0]).unwrap().unwrap();
        assert_eq!(detail.file.name, "harbor.png");
        assert!(detail.file.has_graph);
        assert_eq!(detail.parameters.len(), 2);
        assert_eq!(detail.parameters[0].sink_index, 0);
        assert_eq!(detail.parameters[1].model.as_deref(), Some("refiner.safetensors"));
        assert_eq!(detail.file.width, Some(512));
        assert!(catalog.get_file("missing").unwrap().is_none());
        assert_eq!(catalog.write_count(), 3);
    }

    #[test]
    fn test_reupsert_replaces_parameters_and_keeps_favorite() {
        let (catalog, ids) = seeded();
        assert!(catalog.toggle_favorite(&ids[0]).unwrap());

        let mut file = record("harbor.png", 9_000);
        file.has_graph = true;
        let replacement = vec![param(&file, 0, "flux.safetensors", 3.5, 25, "storm")];
        catalog.upsert_file(&IngestedFile { record: file, parameters: replacement }).unwrap();

        let detail = catalog.get_file(&ids[0]).unwrap().unwrap();
        assert!(detail.file.favorite);
        assert_eq!(detail.file.mtime, 9_000);
        assert_eq!(detail.parameters.len(), 1);
        assert_eq!(detail.parameters[0].model.as_deref(), Some("flux.safetensors"));
    }

    #[test]
    fn test_delete_removes_parameters() {
        let (catalog, ids) = seeded();
        let removed = catalog
            .delete_files(&[ids[0].clone(), "unknown".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(catalog.get_file(&ids[0]).unwrap().is_none());
        assert!(catalog.parameters_for(&ids[0]).unwrap().is_empty());
        assert_eq!(catalog.stats().unwrap().parameters, 1);
    }

    #[test]
    fn test_toggle_favorite_unknown_id() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(matches!(
            catalog.toggle_favorite("nope"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_set_favorite_batch() {
        let (catalog, ids) = seeded();
        assert_eq!(catalog.set_favorite(&ids[..2], true).unwrap(), 2);

        let filters = QueryFilters {
            favorites_only: true,
            ..Default::default()
        };
        let page = catalog.query(&filters, &PageRequest::default()).unwrap();
        assert_eq!(page.total_count, 2);
    }

    #[test]
    fn test_query_default_order_and_paging() {
        let (catalog, _) = seeded();
        let first = catalog.query(&QueryFilters::default(), &PageRequest::new(0, 2)).unwrap();
        assert_eq!(first.total_count, 3);
        assert!(first.has_more);
        let names: Vec<_> = first.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["harbor.png", "forest.png"]);

        let second = catalog.query(&QueryFilters::default(), &PageRequest::new(2, 2)).unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(!second.has_more);

        let by_name = PageRequest {
            sort: SortField::Name,
            order: SortOrder::Asc,
            ..Default::default()
        };
        let page = catalog.query(&QueryFilters::default(), &by_name).unwrap();
        assert_eq!(page.records[0].name, "clip.mp4");
    }

    #[test]
    fn test_query_parameter_filters() {
        let (catalog, ids) = seeded();
        let filters = QueryFilters {
            model: Some("refiner.safetensors".into()),
            steps: Bounds::new(None, Some(15)),
            ..Default::default()
        };
        let page = catalog.query(&filters, &PageRequest::default()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, ids[0]);

        // Both predicates must hold on the same sink.
        let filters = QueryFilters {
            model: Some("refiner.safetensors".into()),
            steps: Bounds::new(Some(20), None),
            ..Default::default()
        };
        assert_eq!(catalog.query(&filters, &PageRequest::default()).unwrap().total_count, 0);

        let filters = QueryFilters {
            cfg: Bounds::new(Some(5.0), Some(7.0)),
            ..Default::default()
        };
        let page = catalog.query(&filters, &PageRequest::default()).unwrap();
        assert_eq!(page.records[0].name, "forest.png");
    }

    #[test]
    fn test_query_text_and_kind() {
        let (catalog, _) = seeded();
        let filters = QueryFilters {
            text: Some("HARBOR".into()),
            ..Default::default()
        };
        assert_eq!(catalog.query(&filters, &PageRequest::default()).unwrap().total_count, 1);

        let filters = QueryFilters {
            text: Some("dense".into()),
            ..Default::default()
        };
        let page = catalog.query(&filters, &PageRequest::default()).unwrap();
        assert_eq!(page.records[0].name, "forest.png");

        let filters = QueryFilters {
            media_kind: Some(MediaKind::Video),
            ..Default::default()
        };
        let page = catalog.query(&filters, &PageRequest::default()).unwrap();
        assert_eq!(page.records[0].name, "clip.mp4");

        let filters = QueryFilters {
            has_graph: Some(false),
            extensions: vec!["mp4".into()],
            ..Default::default()
        };
        assert_eq!(catalog.query(&filters, &PageRequest::default()).unwrap().total_count, 1);
    }

    #[test]
    fn test_filter_options_and_stats() {
        let (catalog, _) = seeded();
        let options = catalog.filter_options().unwrap();
        assert_eq!(options.models.len(), 3);
        assert_eq!(
            options.samplers,
            vec![FacetCount {
                value: "euler".into(),
                files: 2
            }]
        );
        assert_eq!(options.cfg, Some(NumericRange { min: 4.0, max: 7.5 }));
        assert_eq!(options.steps, Some(NumericRange { min: 10, max: 30 }));
        assert_eq!(options.extensions[0].value, "png");

        let stats = catalog.stats().unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.with_graph, 2);
        assert_eq!(stats.parameters, 3);
        assert_eq!(stats.total_bytes, 3 * 1024);
        assert_eq!(stats.by_kind.get("video"), Some(&1));
    }

    #[test]
    fn test_empty_catalog_has_no_ranges() {
        let catalog = Catalog::open_in_memory().unwrap();
        let options = catalog.filter_options().unwrap();
        assert!(options.cfg.is_none());
        assert!(options.models.is_empty());
        assert!(catalog.cached_entries().unwrap().is_empty());
    }

    #[test]
    fn test_cached_entries() {
        let (catalog, ids) = seeded();
        let cached = catalog.cached_entries().unwrap();
        assert_eq!(cached.len(), 3);
        let entry = &cached["/library/harbor.png"];
        assert_eq!(entry.id, ids[0]);
        assert_eq!(entry.mtime, 3_000);
    }

    #[test]
    fn test_reopen_and_read_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("catalog.duckdb");
        {
            let catalog = Catalog::open(&path).unwrap();
            let file = record("a.png", 1);
            catalog.upsert_file(&IngestedFile { record: file, parameters: vec![] }).unwrap();
        }

        let catalog = Catalog::open_read_only(&path).unwrap();
        assert!(catalog.is_read_only());
        assert_eq!(catalog.stats().unwrap().files, 1);
        assert!(matches!(
            catalog.set_favorite(&["x".to_string()], true),
            Err(StoreError::ReadOnly)
        ));
    }
}
