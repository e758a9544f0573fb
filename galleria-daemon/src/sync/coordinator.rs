//! The sync coordinator.

use chrono::Utc;
use galleria_core::ingest::{self, IngestedFile};
use galleria_core::registry::NodeRegistry;
use galleria_core::scanner::{self, ScanOptions, WorkerPool};
use galleria_core::ProbeError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::{SyncError, SyncEvent, SyncProgress, SyncState, SyncStatus, SyncSummary};
use crate::config::GalleriaConfig;
use crate::storage::{Catalog, StoreError};

/// Pause before the single retry of a failed catalog operation.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Capacity of the broadcast channel behind [`SyncCoordinator::subscribe`].
const EVENT_CAPACITY: usize = 1024;

/// Runs sync passes against one catalog, one at a time.
///
/// Cloning is cheap; clones share the same slot, catalog and worker pool.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    catalog: Arc<Catalog>,
    registry: NodeRegistry,
    options: ScanOptions,
    pool: WorkerPool,
    state: Mutex<SyncState>,
    cancel: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    progress: watch::Sender<SyncProgress>,
}

/// Handle to a started pass.
pub struct SyncRun {
    pub id: Uuid,
    /// Every event of this pass, ending with a terminal event.
    pub events: mpsc::UnboundedReceiver<SyncEvent>,
    handle: JoinHandle<Result<SyncSummary, SyncError>>,
}

impl SyncRun {
    /// Wait for the pass to finish.
    pub async fn wait(self) -> Result<SyncSummary, SyncError> {
        self.handle
            .await
            .map_err(|e| SyncError::Join(e.to_string()))?
    }
}

impl SyncCoordinator {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: NodeRegistry,
        options: ScanOptions,
        workers: usize,
    ) -> Result<Self, SyncError> {
        let pool = WorkerPool::new(workers)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (progress, _) = watch::channel(SyncProgress::default());
        debug!(workers = pool.threads(), "sync coordinator ready");
        Ok(Self {
            inner: Arc::new(Inner {
                catalog,
                registry,
                options,
                pool,
                state: Mutex::new(SyncState::Idle),
                cancel: AtomicBool::new(false),
                events,
                progress,
            }),
        })
    }

    /// Build a coordinator from loaded configuration.
    pub fn from_config(catalog: Arc<Catalog>, config: &GalleriaConfig) -> Result<Self, SyncError> {
        Self::new(catalog, config.registry(), config.scan_options(), config.workers())
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    /// Start a pass over `root` on the blocking thread pool.
    ///
    /// Fails with [`SyncError::AlreadyRunning`] while another pass holds the
    /// slot. Must be called from within a Tokio runtime.
    pub fn start(&self, root: impl AsRef<Path>) -> Result<SyncRun, SyncError> {
        let root = resolve_root(root.as_ref());
        let run_id = Uuid::new_v4();
        {
            let mut state = lock(&self.inner.state);
            if let SyncState::Running { run_id: current, .. } = &*state {
                return Err(SyncError::AlreadyRunning(*current));
            }
            *state = SyncState::Running {
                run_id,
                root: root.clone(),
                started_at: Utc::now(),
            };
            self.inner.cancel.store(false, Ordering::SeqCst);
        }

        let (tx, events) = mpsc::unbounded_channel();
        let emitter = Emitter {
            run: tx,
            broadcast: self.inner.events.clone(),
        };
        let inner = Arc::clone(&self.inner);
        let handle = tokio::task::spawn_blocking(move || {
            let slot = Slot {
                inner: &inner,
                released: false,
            };
            let result = run_pass(&inner, run_id, &root, &emitter);
            let (state, terminal) = match &result {
                Ok(summary) if summary.cancelled => (SyncState::Idle, SyncEvent::Cancelled(summary.clone())),
                Ok(summary) => (SyncState::Idle, SyncEvent::Completed(summary.clone())),
                Err(e) => {
                    warn!(run = %run_id, error = %e, "sync failed");
                    inner.progress.send_modify(|p| p.status = SyncStatus::Failed);
                    let failed = SyncState::Failed {
                        error: e.to_string(),
                        at: Utc::now(),
                    };
                    (failed, SyncEvent::Failed { error: e.to_string() })
                }
            };
            // Free the slot first: a listener may start the next pass as soon
            // as it sees the terminal event.
            slot.release(state);
            emitter.emit(terminal);
            result
        });

        Ok(SyncRun {
            id: run_id,
            events,
            handle,
        })
    }

    /// Run a pass over `root` and wait for it.
    pub async fn sync(&self, root: impl AsRef<Path>) -> Result<SyncSummary, SyncError> {
        self.start(root)?.wait().await
    }

    /// Events of every pass, for observers that did not start it.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Latest progress of the current or last pass.
    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.inner.progress.subscribe()
    }

    /// Ask the running pass to stop between files. Returns whether a pass
    /// was running.
    pub fn cancel(&self) -> bool {
        let running = lock(&self.inner.state).is_running();
        if running {
            info!("sync cancellation requested");
            self.inner.cancel.store(true, Ordering::SeqCst);
        }
        running
    }

    pub fn state(&self) -> SyncState {
        lock(&self.inner.state).clone()
    }
}

/// Sends each event to the run's own channel and to broadcast subscribers.
struct Emitter {
    run: mpsc::UnboundedSender<SyncEvent>,
    broadcast: broadcast::Sender<SyncEvent>,
}

impl Emitter {
    fn emit(&self, event: SyncEvent) {
        // Both sends fail only when nobody is listening.
        let _ = self.broadcast.send(event.clone());
        let _ = self.run.send(event);
    }
}

/// Holds the coordinator slot for one pass. A pass that unwinds before
/// [`Slot::release`] leaves the coordinator `Failed` instead of `Running`.
struct Slot<'a> {
    inner: &'a Inner,
    released: bool,
}

impl Slot<'_> {
    fn release(mut self, next: SyncState) {
        *lock(&self.inner.state) = next;
        self.released = true;
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if !self.released {
            *lock(&self.inner.state) = SyncState::Failed {
                error: "sync worker panicked".to_string(),
                at: Utc::now(),
            };
        }
    }
}

/// Absolute, symlink-free form of `root`, so file ids do not depend on how
/// the caller spelled it. A root that does not exist is kept as given and
/// fails the walk.
fn resolve_root(root: &Path) -> PathBuf {
    root.canonicalize()
        .or_else(|_| std::path::absolute(root))
        .unwrap_or_else(|_| root.to_path_buf())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Recovering from poisoned sync state mutex");
            poisoned.into_inner()
        }
    }
}

/// Run `op`, and once more after a short pause if it fails.
fn retry_once<T>(what: &str, mut op: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
    match op() {
        Ok(value) => Ok(value),
        Err(StoreError::ReadOnly) => Err(StoreError::ReadOnly),
        Err(e) => {
            debug!(error = %e, "{} failed, retrying once", what);
            std::thread::sleep(RETRY_DELAY);
            op()
        }
    }
}

fn run_pass(
    inner: &Inner,
    run_id: Uuid,
    root: &Path,
    emitter: &Emitter,
) -> Result<SyncSummary, SyncError> {
    let span = info_span!("sync", run = %run_id, root = %root.display());
    let _enter = span.enter();
    let start = Instant::now();

    emitter.emit(SyncEvent::Started {
        run_id,
        root: root.to_path_buf(),
    });
    report(inner, emitter, 0, 0, SyncStatus::Scanning);

    let cached = retry_once("reading cached entries", || inner.catalog.cached_entries())?;
    let changes = scanner::scan(root, &inner.options, &cached)?;
    info!(
        add = changes.to_add.len(),
        update = changes.to_update.len(),
        remove = changes.to_remove.len(),
        unchanged = changes.unchanged,
        "scanned"
    );
    emitter.emit(SyncEvent::Scanned {
        to_add: changes.to_add.len(),
        to_update: changes.to_update.len(),
        to_remove: changes.to_remove.len(),
        unchanged: changes.unchanged,
    });

    let mut summary = SyncSummary {
        run_id,
        added: 0,
        updated: 0,
        removed: 0,
        unchanged: changes.unchanged,
        failed: 0,
        written: 0,
        cancelled: false,
        duration_ms: 0,
    };
    let total = changes.pending();

    if !changes.to_remove.is_empty() {
        report(inner, emitter, 0, total, SyncStatus::Removing);
        match retry_once("removing files", || inner.catalog.delete_files(&changes.to_remove)) {
            Ok(removed) => {
                summary.removed = removed;
                summary.written += removed;
            }
            Err(e) => {
                warn!(count = changes.to_remove.len(), error = %e, "failed to remove files");
                summary.failed += changes.to_remove.len();
            }
        }
    }

    let paths: Vec<PathBuf> = changes
        .to_add
        .iter()
        .chain(&changes.to_update)
        .cloned()
        .collect();
    let new_paths: HashSet<&PathBuf> = changes.to_add.iter().collect();
    report(inner, emitter, 0, total, SyncStatus::Extracting);

    let (tx, rx) = std_mpsc::channel::<(PathBuf, Result<IngestedFile, ProbeError>)>();
    let processed = std::thread::scope(|scope| {
        let paths = &paths;
        let registry = &inner.registry;
        scope.spawn(move || {
            inner
                .pool
                .dispatch(paths, &inner.cancel, |path| ingest::process_file(path, registry), tx)
        });

        let mut processed = 0;
        for (path, result) in rx {
            let outcome = result.map_err(|e| e.to_string()).and_then(|file| {
                retry_once("writing file", || inner.catalog.upsert_file(&file)).map_err(|e| e.to_string())
            });
            match outcome {
                Ok(()) => {
                    if new_paths.contains(&path) {
                        summary.added += 1;
                    } else {
                        summary.updated += 1;
                    }
                    summary.written += 1;
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping file");
                    summary.failed += 1;
                    emitter.emit(SyncEvent::FileFailed { path, error });
                }
            }
            processed += 1;
            report(inner, emitter, processed, total, SyncStatus::Extracting);
        }
        processed
    });

    // A cancel that lands after the last file changes nothing.
    summary.cancelled = inner.cancel.load(Ordering::SeqCst) && processed < paths.len();
    summary.duration_ms = start.elapsed().as_millis() as u64;

    info!(
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        unchanged = summary.unchanged,
        failed = summary.failed,
        cancelled = summary.cancelled,
        duration_ms = summary.duration_ms,
        "sync finished"
    );

    if summary.cancelled {
        report(inner, emitter, processed, total, SyncStatus::Cancelled);
    } else {
        report(inner, emitter, total, total, SyncStatus::Completed);
    }
    Ok(summary)
}

fn report(inner: &Inner, emitter: &Emitter, processed: usize, total: usize, status: SyncStatus) {
    let progress = SyncProgress {
        processed,
        total,
        status,
    };
    inner.progress.send_replace(progress);
    emitter.emit(SyncEvent::Progress(progress));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::faults;
    use galleria_core::types::file_id;
    use tempfile::{tempdir, TempDir};

    /// A library of files without embedded graphs; each ingests as a plain record.
    fn library(names: &[&str]) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"not a real png").unwrap();
        }
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    fn coordinator() -> (Arc<Catalog>, SyncCoordinator) {
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let coordinator =
            SyncCoordinator::new(Arc::clone(&catalog), NodeRegistry::builtin(), ScanOptions::default(), 2).unwrap();
        (catalog, coordinator)
    }

    async fn collect(mut run: SyncRun) -> (Vec<SyncEvent>, SyncSummary) {
        let mut events = Vec::new();
        while let Some(event) = run.events.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        (events, run.wait().await.unwrap())
    }

    #[test]
    fn test_retry_once() {
        let mut calls = 0;
        let result = retry_once("write", || {
            calls += 1;
            if calls == 1 {
                Err(StoreError::NotFound { id: "x".into() })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);

        let mut calls = 0;
        let result: Result<(), StoreError> = retry_once("write", || {
            calls += 1;
            Err(StoreError::NotFound { id: "x".into() })
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);

        let mut calls = 0;
        let result: Result<(), StoreError> = retry_once("write", || {
            calls += 1;
            Err(StoreError::ReadOnly)
        });
        assert!(matches!(result, Err(StoreError::ReadOnly)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_failed_writes_are_retried_then_skipped() {
        let (_dir, root) = library(&["a.png", "b.png", "c.png"]);
        // b fails once and lands on the retry; c fails both attempts.
        faults::fail_writes(&file_id(&root.join("b.png")), 1);
        faults::fail_writes(&file_id(&root.join("c.png")), 2);
        let (catalog, coordinator) = coordinator();

        let (events, summary) = collect(coordinator.start(&root).unwrap()).await;
        assert_eq!((summary.added, summary.failed, summary.written), (2, 1, 2));
        assert!(matches!(events.last(), Some(SyncEvent::Completed(_))));

        let failed: Vec<&PathBuf> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::FileFailed { path, error } => {
                    assert!(error.contains("scripted write failure"));
                    Some(path)
                }
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![&root.join("c.png")]);
        assert!(catalog.get_file(&file_id(&root.join("a.png"))).unwrap().is_some());
        assert!(catalog.get_file(&file_id(&root.join("b.png"))).unwrap().is_some());
        assert!(catalog.get_file(&file_id(&root.join("c.png"))).unwrap().is_none());

        // Nothing was cached for c, so the next pass picks it up.
        let summary = coordinator.sync(&root).await.unwrap();
        assert_eq!((summary.added, summary.unchanged, summary.failed), (1, 2, 0));
    }

    #[tokio::test]
    async fn test_failed_removal_keeps_rows_until_next_pass() {
        let (_dir, root) = library(&["a.png", "b.png"]);
        let (catalog, coordinator) = coordinator();
        coordinator.sync(&root).await.unwrap();

        let gone = root.join("a.png");
        std::fs::remove_file(&gone).unwrap();
        faults::fail_writes(&file_id(&gone), 2);

        let (events, summary) = collect(coordinator.start(&root).unwrap()).await;
        assert_eq!((summary.removed, summary.failed, summary.unchanged), (0, 1, 1));
        assert!(matches!(events.last(), Some(SyncEvent::Completed(_))));
        assert!(catalog.get_file(&file_id(&gone)).unwrap().is_some());

        let summary = coordinator.sync(&root).await.unwrap();
        assert_eq!((summary.removed, summary.failed), (1, 0));
        assert!(catalog.get_file(&file_id(&gone)).unwrap().is_none());
    }

    #[test]
    fn test_cancel_with_nothing_left_is_not_reported() {
        let (_dir, root) = library(&["a.png"]);
        let (_catalog, coordinator) = coordinator();
        let inner = &coordinator.inner;
        let (tx, _rx) = mpsc::unbounded_channel();
        let emitter = Emitter {
            run: tx,
            broadcast: inner.events.clone(),
        };

        let first = run_pass(inner, Uuid::new_v4(), &root, &emitter).unwrap();
        assert_eq!(first.added, 1);

        // Cancel arrives when every file is already written.
        inner.cancel.store(true, Ordering::SeqCst);
        let second = run_pass(inner, Uuid::new_v4(), &root, &emitter).unwrap();
        assert!(!second.cancelled);
        assert_eq!(second.unchanged, 1);
        assert_eq!(inner.progress.borrow().status, SyncStatus::Completed);
    }
}
