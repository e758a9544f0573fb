//! End-to-end sync passes against a temporary library and catalog.

mod common;

use filetime::{set_file_mtime, FileTime};
use galleria_core::scanner::{self, ScanOptions};
use galleria_core::types::file_id;
use galleria_core::NodeRegistry;
use galleria_daemon::storage::Catalog;
use galleria_daemon::sync::{SyncCoordinator, SyncError, SyncEvent, SyncState, SyncStatus};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct Fixture {
    library: TempDir,
    catalog: Arc<Catalog>,
    coordinator: SyncCoordinator,
}

fn fixture() -> Fixture {
    let library = tempdir().expect("Failed to create temp dir");
    let catalog = Arc::new(Catalog::open_in_memory().expect("Failed to open catalog"));
    let coordinator =
        SyncCoordinator::new(Arc::clone(&catalog), NodeRegistry::builtin(), ScanOptions::default(), 2)
            .expect("Failed to build coordinator");
    Fixture {
        library,
        catalog,
        coordinator,
    }
}

#[tokio::test]
async fn test_single_sampler_file_is_cataloged() {
    let fx = fixture();
    let path = common::write_graph_png(fx.library.path(), "lighthouse.png", common::SINGLE_SAMPLER);

    let summary = fx.coordinator.sync(fx.library.path()).await.expect("sync failed");
    assert_eq!(summary.added, 1);
    assert_eq!(summary.failed, 0);
    assert!(!summary.cancelled);

    let stats = fx.catalog.stats().unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(stats.parameters, 1);

    let detail = fx.catalog.get_file(&file_id(&path)).unwrap().expect("file missing");
    assert!(detail.file.has_graph);
    assert_eq!(detail.file.name, "lighthouse.png");
    assert_eq!((detail.file.width, detail.file.height), (Some(512), Some(512)));

    let p = &detail.parameters[0];
    assert_eq!(p.sink_index, 0);
    assert_eq!(p.model.as_deref(), Some("m.safetensors"));
    assert_eq!(p.sampler.as_deref(), Some("euler"));
    assert_eq!(p.scheduler.as_deref(), Some("normal"));
    assert_eq!(p.cfg, Some(7.5));
    assert_eq!(p.steps, Some(30));
    assert_eq!(p.positive_prompt.as_deref(), Some("a lighthouse in fog"));
    assert_eq!(p.negative_prompt.as_deref(), Some("blurry"));
    assert_eq!((p.width, p.height), (Some(832), Some(1216)));
}

#[tokio::test]
async fn test_unchanged_file_is_not_rewritten() {
    let fx = fixture();
    common::write_graph_png(fx.library.path(), "lighthouse.png", common::SINGLE_SAMPLER);
    fx.coordinator.sync(fx.library.path()).await.expect("first sync failed");
    let writes = fx.catalog.write_count();

    let cached = fx.catalog.cached_entries().unwrap();
    let changes = scanner::scan(fx.library.path(), &ScanOptions::default(), &cached).unwrap();
    assert!(changes.to_update.is_empty());
    assert!(changes.is_empty());

    let summary = fx.coordinator.sync(fx.library.path()).await.expect("second sync failed");
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.written, 0);
    assert_eq!(fx.catalog.write_count(), writes);
}

#[tokio::test]
async fn test_deleted_file_is_removed_with_parameters() {
    let fx = fixture();
    let path = common::write_graph_png(fx.library.path(), "lighthouse.png", common::SINGLE_SAMPLER);
    fx.coordinator.sync(fx.library.path()).await.expect("first sync failed");

    std::fs::remove_file(&path).unwrap();
    let summary = fx.coordinator.sync(fx.library.path()).await.expect("second sync failed");

    assert_eq!(summary.removed, 1);
    let id = file_id(&path);
    assert!(fx.catalog.get_file(&id).unwrap().is_none());
    assert!(fx.catalog.parameters_for(&id).unwrap().is_empty());
    assert_eq!(fx.catalog.stats().unwrap().parameters, 0);
}

#[tokio::test]
async fn test_refine_chain_yields_two_ordered_records() {
    let fx = fixture();
    let path = common::write_graph_png(fx.library.path(), "fox.png", common::REFINE_CHAIN);
    fx.coordinator.sync(fx.library.path()).await.expect("sync failed");

    let params = fx.catalog.parameters_for(&file_id(&path)).unwrap();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].sink_index, 0);
    assert_eq!((params[0].cfg, params[0].steps), (Some(7.5), Some(30)));
    assert_eq!(params[1].sink_index, 1);
    assert_eq!((params[1].cfg, params[1].steps), (Some(4.0), Some(12)));
    assert_eq!(params[1].sampler.as_deref(), Some("dpmpp_2m"));
    assert!(params.iter().all(|p| p.model.as_deref() == Some("base.safetensors")));
    assert_eq!(params[1].width, Some(1024));

    let detail = fx.catalog.get_file(&file_id(&path)).unwrap().unwrap();
    assert_eq!(detail.file.sampler_names.as_deref(), Some("euler, dpmpp_2m"));
}

#[tokio::test]
async fn test_modified_file_is_reextracted_and_keeps_favorite() {
    let fx = fixture();
    let path = common::write_graph_png(fx.library.path(), "art.png", common::SINGLE_SAMPLER);
    set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    fx.coordinator.sync(fx.library.path()).await.expect("first sync failed");

    let id = file_id(&path);
    assert!(fx.catalog.toggle_favorite(&id).unwrap());

    common::write_graph_png(fx.library.path(), "art.png", common::REFINE_CHAIN);
    set_file_mtime(&path, FileTime::from_unix_time(1_700_000_100, 0)).unwrap();
    let summary = fx.coordinator.sync(fx.library.path()).await.expect("second sync failed");

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.added, 0);
    let detail = fx.catalog.get_file(&id).unwrap().unwrap();
    assert!(detail.file.favorite);
    assert_eq!(detail.file.mtime, 1_700_000_100_000);
    assert_eq!(detail.parameters.len(), 2);
}

#[tokio::test]
async fn test_files_without_usable_graphs() {
    let fx = fixture();
    let plain = fx.library.path().join("photo.png");
    std::fs::write(&plain, common::png_with_text(16, 16, &[])).unwrap();
    let broken = fx.library.path().join("broken.png");
    std::fs::write(&broken, common::png_with_text(16, 16, &[("workflow", "[1, 2]")])).unwrap();
    std::fs::write(fx.library.path().join("notes.txt"), "not media").unwrap();

    let summary = fx.coordinator.sync(fx.library.path()).await.expect("sync failed");
    assert_eq!(summary.added, 2);
    assert_eq!(summary.failed, 0);

    for path in [&plain, &broken] {
        let detail = fx.catalog.get_file(&file_id(path)).unwrap().unwrap();
        assert!(!detail.file.has_graph);
        assert!(detail.parameters.is_empty());
    }
}

#[tokio::test]
async fn test_events_and_progress() {
    let fx = fixture();
    for i in 0..5 {
        common::write_graph_png(fx.library.path(), &format!("img_{}.png", i), common::SINGLE_SAMPLER);
    }
    let mut observer = fx.coordinator.subscribe();

    let mut run = fx.coordinator.start(fx.library.path()).expect("start failed");
    let mut events = Vec::new();
    while let Some(event) = run.events.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    let summary = run.wait().await.expect("sync failed");

    assert!(matches!(events.first(), Some(SyncEvent::Started { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::Scanned { to_add: 5, .. })));
    assert_eq!(events.last(), Some(&SyncEvent::Completed(summary.clone())));

    let processed: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Progress(p) if p.status == SyncStatus::Extracting => Some(p.processed),
            _ => None,
        })
        .collect();
    assert!(processed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(processed.last(), Some(&5));

    let progress = *fx.coordinator.progress().borrow();
    assert_eq!((progress.processed, progress.total), (5, 5));
    assert_eq!(progress.status, SyncStatus::Completed);

    assert!(matches!(observer.recv().await, Ok(SyncEvent::Started { .. })));
}

#[tokio::test]
async fn test_missing_root_fails_and_frees_the_slot() {
    let fx = fixture();
    let missing = fx.library.path().join("gone");

    let result = fx.coordinator.sync(&missing).await;
    assert!(matches!(result, Err(SyncError::Scan(_))));
    assert!(matches!(fx.coordinator.state(), SyncState::Failed { .. }));

    common::write_graph_png(fx.library.path(), "ok.png", common::SINGLE_SAMPLER);
    let summary = fx.coordinator.sync(fx.library.path()).await.expect("sync after failure");
    assert_eq!(summary.added, 1);
    assert_eq!(fx.coordinator.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_cancelled_sync_resumes_on_next_pass() {
    let fx = fixture();
    for i in 0..300 {
        common::write_graph_png(fx.library.path(), &format!("img_{:03}.png", i), common::SINGLE_SAMPLER);
    }

    let run = fx.coordinator.start(fx.library.path()).expect("start failed");
    fx.coordinator.cancel();
    let first = run.wait().await.expect("cancelled sync should still report");
    let stored = fx.catalog.stats().unwrap().files as usize;
    assert_eq!(stored, first.added);
    if first.cancelled {
        assert!(first.added <= 300);
    }

    // Every committed file is complete, and the next pass picks up the rest.
    let second = fx.coordinator.sync(fx.library.path()).await.expect("second sync failed");
    assert!(!second.cancelled);
    assert_eq!(second.added + first.added, 300);
    assert_eq!(second.unchanged, first.added);
    assert_eq!(fx.catalog.stats().unwrap().parameters, 300);
}

#[tokio::test]
async fn test_relative_and_absolute_roots_share_ids() {
    let fx = fixture();
    let library = tempfile::Builder::new()
        .prefix("rel-lib")
        .tempdir_in(".")
        .expect("Failed to create relative temp dir");
    let relative = std::path::PathBuf::from(".").join(library.path().file_name().unwrap());
    assert!(relative.is_relative());
    common::write_graph_png(&relative, "a.png", common::SINGLE_SAMPLER);
    let absolute = relative.canonicalize().unwrap();

    let first = fx.coordinator.sync(&relative).await.expect("relative sync failed");
    assert_eq!(first.added, 1);

    let id = file_id(&absolute.join("a.png"));
    assert!(fx.catalog.toggle_favorite(&id).unwrap());
    let detail = fx.catalog.get_file(&id).unwrap().expect("stored under the absolute id");
    assert!(std::path::Path::new(&detail.file.path).is_absolute());

    let second = fx.coordinator.sync(&absolute).await.expect("absolute sync failed");
    assert_eq!((second.added, second.removed, second.unchanged), (0, 0, 1));
    assert!(fx.catalog.get_file(&id).unwrap().unwrap().file.favorite);
}

#[tokio::test]
async fn test_next_pass_can_start_on_completion_event() {
    let fx = fixture();
    common::write_graph_png(fx.library.path(), "a.png", common::SINGLE_SAMPLER);

    let mut run = fx.coordinator.start(fx.library.path()).expect("start failed");
    while let Some(event) = run.events.recv().await {
        if event.is_terminal() {
            assert!(matches!(event, SyncEvent::Completed(_)));
            break;
        }
    }
    let next = fx
        .coordinator
        .start(fx.library.path())
        .expect("slot should be free once the terminal event is out");

    assert_eq!(run.wait().await.expect("first pass failed").added, 1);
    assert_eq!(next.wait().await.expect("second pass failed").unchanged, 1);
}
