use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use seedkeeper::fs::mock::{MockEntry, MockFileSystem};
use seedkeeper::fs::FileSystem;
use seedkeeper::pipeline::{seed_expired, Coordinator, Detector, Dropper, Monitor, Relocation};
use seedkeeper::registry::Registry;
use seedkeeper::report::StatusReporter;
use seedkeeper::transfer::{TransferEngine, TransferHandle};
use seedkeeper::types::{IdentityHash, ProgressId, State, TransferInfo};
use seedkeeper_test_utils::fake_engine::{FakeEngine, FakeLayout};
use seedkeeper_test_utils::{init_tracing, wait_until, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn detector(
    registry: &Arc<Registry>,
    fs: &MockFileSystem,
    capacity: usize,
) -> (Detector, mpsc::Receiver<ProgressId>) {
    let (tx, rx) = mpsc::channel(capacity);
    let detector = Detector::new(
        Arc::clone(registry),
        Arc::new(fs.clone()),
        Arc::new(Mutex::new(())),
        "/watch",
        "torrent",
        tx,
    );
    (detector, rx)
}

/// Register `path` and walk it to `Seeding` as the coordinator and monitor
/// would.
fn seeding_entry(registry: &Registry, path: &str, hash: &str) -> ProgressId {
    let (id, _) = registry.register(path);
    registry
        .set_transfer_info(
            id,
            TransferInfo {
                hash: IdentityHash::new(hash),
                name: hash.to_string(),
                size: 1000,
            },
        )
        .unwrap();
    registry.set_state(id, State::Downloading).unwrap();
    registry.set_state(id, State::Seeding).unwrap();
    id
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detector_registers_descriptors_once() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let fs = MockFileSystem::new();
    fs.add_file("/watch/a.torrent", "a");
    fs.add_file("/watch/notes.txt", "ignored");
    fs.add_file("/watch/sub/b.TORRENT", "b");

    let (detector, mut rx) = detector(&registry, &fs, 8);

    let first = detector.scan().await?;
    assert_eq!(first.len(), 2);
    assert_eq!(rx.recv().await, Some(first[0]));
    assert_eq!(rx.recv().await, Some(first[1]));
    assert_eq!(registry.path(first[0]), Some(PathBuf::from("/watch/a.torrent")));

    // A second cycle sees the same files and emits nothing.
    let second = detector.scan().await?;
    assert!(second.is_empty());
    assert!(rx.try_recv().is_err());
    assert_eq!(registry.len(), 2);
    Ok(())
}

#[tokio::test]
async fn detector_read_failure_aborts_cycle_without_registering() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let fs = MockFileSystem::new();
    fs.add_file("/watch/a.torrent", "a");
    fs.add_file("/watch/locked/b.torrent", "b");
    fs.fail_read_dir("/watch/locked", true);

    let (detector, mut rx) = detector(&registry, &fs, 8);

    assert!(detector.scan().await.is_err());
    assert!(registry.is_empty());
    assert!(rx.try_recv().is_err());

    // Next cycle succeeds once the directory is readable again.
    fs.fail_read_dir("/watch/locked", false);
    assert_eq!(detector.scan().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn detector_waits_for_queue_space() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let fs = MockFileSystem::new();
    fs.add_file("/watch/a.torrent", "a");
    fs.add_file("/watch/b.torrent", "b");

    let (detector, mut rx) = detector(&registry, &fs, 1);
    let scan = tokio::spawn(async move { detector.scan().await.map_err(|e| e.to_string()) });

    // With capacity 1 the scan cannot finish until we consume.
    let first = with_timeout(rx.recv()).await;
    let second = with_timeout(rx.recv()).await;
    assert!(first < second);

    let ids = with_timeout(scan).await??;
    assert_eq!(ids, vec![first.unwrap(), second.unwrap()]);
    Ok(())
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn coordinator_erases_refused_descriptor() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::new());
    engine.refuse("/watch/bad.torrent");

    let (_tx, rx) = mpsc::channel(1);
    let mut coordinator = Coordinator::new(Arc::clone(&registry), engine.clone(), rx);

    let (id, _) = registry.register("/watch/bad.torrent");
    coordinator.start(id);

    assert!(!registry.exists(id));
    assert_eq!(coordinator.pending(), 0);
    assert_eq!(engine.submitted(), vec![PathBuf::from("/watch/bad.torrent")]);
    Ok(())
}

#[tokio::test]
async fn coordinator_ignores_unknown_id() {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::new());
    let (_tx, rx) = mpsc::channel(1);
    let mut coordinator = Coordinator::new(registry, engine.clone(), rx);

    coordinator.start(ProgressId(7));
    assert!(engine.submitted().is_empty());
    assert_eq!(coordinator.pending(), 0);
}

#[tokio::test]
async fn coordinator_starts_download_once_metadata_resolves() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::new());
    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let coordinator = Coordinator::new(Arc::clone(&registry), engine.clone(), rx);
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    let (id, _) = registry.register("/watch/album.torrent");
    tx.send(id).await?;

    let hash = FakeEngine::hash_for("/watch/album.torrent");
    wait_until("submitted", || engine.transfer(&hash).is_some()).await;

    // Still waiting for metadata: nothing recorded yet.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(registry.state(id), Some(State::Detected));
    let transfer = engine.transfer(&hash).ok_or("no transfer")?;
    assert!(!transfer.started());

    transfer.resolve();
    wait_until("downloading", || {
        registry.state(id) == Some(State::Downloading)
    })
    .await;

    assert!(transfer.started());
    let p = registry.progress(id).ok_or("missing")?;
    assert_eq!(p.hash, Some(hash));
    assert_eq!(p.name.as_deref(), Some("album"));
    assert_eq!(p.size, Some(1000));
    assert!(p.started_at.is_some());

    cancel.cancel();
    with_timeout(task).await?;
    Ok(())
}

#[tokio::test]
async fn coordinator_cancel_aborts_unresolved_waiters() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::new());
    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let coordinator = Coordinator::new(Arc::clone(&registry), engine.clone(), rx);
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    let (id, _) = registry.register("/watch/never.torrent");
    tx.send(id).await?;
    wait_until("submitted", || !engine.submitted().is_empty()).await;

    cancel.cancel();
    with_timeout(task).await?;
    assert_eq!(registry.state(id), Some(State::Detected));
    Ok(())
}

#[tokio::test]
async fn coordinator_keeps_one_entry_per_identity_hash() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let (tx, rx) = mpsc::channel(2);
    let cancel = CancellationToken::new();

    let coordinator = Coordinator::new(Arc::clone(&registry), engine.clone(), rx);
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    // Same file stem, so the fake engine resolves both to one transfer.
    let (first, _) = registry.register("/watch/a.torrent");
    let (second, _) = registry.register("/watch/sub/a.torrent");
    tx.send(first).await?;
    tx.send(second).await?;

    let hash = FakeEngine::hash_for("/watch/a.torrent");
    wait_until("duplicate dropped", || {
        engine.submitted().len() == 2 && registry.len() == 1
    })
    .await;

    let owner = registry.find_by_hash(&hash).ok_or("hash has no owner")?;
    assert!(owner == first || owner == second);
    wait_until("owner downloading", || {
        registry.state(owner) == Some(State::Downloading)
    })
    .await;
    assert!(engine.stopped().is_empty());
    assert!(engine.transfer(&hash).is_some());

    cancel.cancel();
    with_timeout(task).await?;
    Ok(())
}

#[tokio::test]
async fn coordinator_stops_transfer_when_entry_vanishes_before_metadata() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::new());
    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();

    let coordinator = Coordinator::new(Arc::clone(&registry), engine.clone(), rx);
    let task = tokio::spawn(coordinator.run(cancel.clone()));

    let (id, _) = registry.register("/watch/gone.torrent");
    tx.send(id).await?;

    let hash = FakeEngine::hash_for("/watch/gone.torrent");
    wait_until("submitted", || engine.transfer(&hash).is_some()).await;
    let transfer = engine.transfer(&hash).ok_or("no transfer")?;

    registry.erase(id);
    transfer.resolve();

    wait_until("transfer stopped", || engine.stopped().contains(&hash)).await;
    assert!(engine.transfer(&hash).is_none());
    assert!(!transfer.started());

    cancel.cancel();
    with_timeout(task).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[test]
fn seed_boundary_is_inclusive() {
    let d = Duration::from_secs(3600);
    assert!(!seed_expired(d - Duration::from_millis(1), d));
    assert!(seed_expired(d, d));
    assert!(seed_expired(d + Duration::from_millis(1), d));
    assert!(seed_expired(Duration::ZERO, Duration::ZERO));
}

#[tokio::test(start_paused = true)]
async fn monitor_moves_completed_to_seeding_then_expires_at_seed_time() -> TestResult {
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let seed_time = Duration::from_secs(60);
    let (drop_tx, mut drop_rx) = mpsc::channel(4);
    let monitor = Monitor::new(Arc::clone(&registry), engine.clone(), seed_time, drop_tx);

    let (id, _) = registry.register("/watch/album.torrent");
    let handle = engine.submit(Path::new("/watch/album.torrent"))?;
    registry.set_transfer_info(id, handle.info().ok_or("no info")?)?;
    registry.set_state(id, State::Downloading)?;
    let hash = FakeEngine::hash_for("/watch/album.torrent");
    let transfer = engine.transfer(&hash).ok_or("no transfer")?;

    // Incomplete transfers are left alone.
    transfer.set_completed(999);
    assert!(monitor.tick().await?.is_empty());
    assert_eq!(registry.state(id), Some(State::Downloading));

    transfer.complete();
    assert!(monitor.tick().await?.is_empty());
    assert_eq!(registry.state(id), Some(State::Seeding));

    tokio::time::advance(seed_time - Duration::from_millis(1)).await;
    assert!(monitor.tick().await?.is_empty());
    assert_eq!(registry.state(id), Some(State::Seeding));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(monitor.tick().await?, vec![hash.clone()]);
    assert_eq!(registry.state(id), Some(State::SeedEnded));
    assert_eq!(drop_rx.recv().await, Some(hash));

    // Already handed over: never queued twice.
    tokio::time::advance(seed_time).await;
    assert!(monitor.tick().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn monitor_skips_orphans_and_unrecorded_transfers() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let (drop_tx, _drop_rx) = mpsc::channel(4);
    let monitor = Monitor::new(Arc::clone(&registry), engine.clone(), Duration::ZERO, drop_tx);

    // Complete transfer the registry has never heard of.
    let orphan = engine.inject(
        IdentityHash::new("0rphan"),
        FakeLayout {
            name: "orphan".into(),
            size: 10,
            files: vec![PathBuf::from("orphan")],
        },
    );
    orphan.resolve();
    orphan.complete();

    // Complete transfer whose entry is still `Detected`.
    let (id, _) = registry.register("/watch/early.torrent");
    let handle = engine.submit(Path::new("/watch/early.torrent"))?;
    registry.set_transfer_info(id, handle.info().ok_or("no info")?)?;
    engine
        .transfer(&FakeEngine::hash_for("/watch/early.torrent"))
        .ok_or("no transfer")?
        .complete();

    assert!(monitor.tick().await?.is_empty());
    assert_eq!(registry.state(id), Some(State::Detected));
    assert_eq!(registry.len(), 1);
    Ok(())
}

#[tokio::test]
async fn monitor_with_zero_seed_time_expires_in_same_cycle() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let (drop_tx, _drop_rx) = mpsc::channel(4);
    let monitor = Monitor::new(Arc::clone(&registry), engine.clone(), Duration::ZERO, drop_tx);

    let (id, _) = registry.register("/watch/x.torrent");
    let handle = engine.submit(Path::new("/watch/x.torrent"))?;
    registry.set_transfer_info(id, handle.info().ok_or("no info")?)?;
    registry.set_state(id, State::Downloading)?;
    engine
        .transfer(&FakeEngine::hash_for("/watch/x.torrent"))
        .ok_or("no transfer")?
        .complete();

    assert_eq!(monitor.tick().await?.len(), 1);
    assert_eq!(registry.state(id), Some(State::SeedEnded));
    Ok(())
}

// ---------------------------------------------------------------------------
// Dropper
// ---------------------------------------------------------------------------

fn dropper(
    registry: &Arc<Registry>,
    engine: &Arc<FakeEngine>,
    fs: &MockFileSystem,
) -> (Dropper, mpsc::Sender<IdentityHash>) {
    let (tx, rx) = mpsc::channel(4);
    let dropper = Dropper::new(
        Arc::clone(registry),
        engine.clone(),
        Arc::new(fs.clone()),
        Arc::new(Mutex::new(())),
        "/work",
        "/done",
        rx,
    );
    (dropper, tx)
}

#[tokio::test]
async fn dropper_moves_content_and_forgets_entry() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let fs = MockFileSystem::new();
    fs.add_file("/watch/album.torrent", "d");
    fs.add_file("/work/album/01.flac", "1");
    fs.add_file("/work/album/02.flac", "2");
    fs.add_file("/work/bonus.txt", "b");
    fs.add_file("/work/unrelated/keep.bin", "k");

    engine.set_layout(
        "/watch/album.torrent",
        FakeLayout {
            name: "album".into(),
            size: 3,
            files: vec![
                PathBuf::from("album/01.flac"),
                PathBuf::from("album/02.flac"),
                PathBuf::from("bonus.txt"),
            ],
        },
    );
    engine.submit(Path::new("/watch/album.torrent"))?;
    let hash = FakeEngine::hash_for("/watch/album.torrent");
    let id = seeding_entry(&registry, "/watch/album.torrent", hash.as_str());
    registry.set_state(id, State::SeedEnded)?;

    let (mut dropper, _tx) = dropper(&registry, &engine, &fs);
    dropper.drop_transfer(&hash).await;
    dropper.drain().await;

    assert_eq!(engine.stopped(), vec![hash.clone()]);
    assert!(engine.transfer(&hash).is_none());
    assert_eq!(fs.entry("/done/album/02.flac"), Some(MockEntry::File(b"2".to_vec())));
    assert!(fs.contains(Path::new("/done/bonus.txt")));
    assert!(!fs.contains(Path::new("/work/album")));
    assert!(fs.contains(Path::new("/work/unrelated/keep.bin")));
    assert!(!fs.contains(Path::new("/watch/album.torrent")));
    assert!(!registry.exists(id));
    Ok(())
}

#[tokio::test]
async fn relocation_failure_is_per_component() {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::new());
    let fs = MockFileSystem::new();
    fs.add_file("/work/a/1", "1");
    fs.add_file("/work/b/2", "2");
    fs.add_file("/work/c", "3");
    fs.fail_rename("/work/b", true);

    let (dropper, _tx) = dropper(&registry, &engine, &fs);
    let relocation = dropper.relocate(&[
        PathBuf::from("c"),
        PathBuf::from("b/2"),
        PathBuf::from("a/1"),
        PathBuf::from("a/sub/3"),
        PathBuf::from("../escape"),
    ])
    .await;

    assert_eq!(
        relocation,
        Relocation {
            moved: vec![PathBuf::from("a"), PathBuf::from("c")],
            failed: vec![PathBuf::from(".."), PathBuf::from("b")],
        }
    );
    assert!(fs.contains(Path::new("/done/a/1")));
    assert!(fs.contains(Path::new("/work/b/2")));
}

#[tokio::test]
async fn descriptor_delete_failure_keeps_entry() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let fs = MockFileSystem::new();
    fs.add_file("/watch/x.torrent", "d");
    fs.add_file("/work/x/payload.bin", "p");
    fs.fail_remove("/watch/x.torrent", true);

    engine.submit(Path::new("/watch/x.torrent"))?;
    let hash = FakeEngine::hash_for("/watch/x.torrent");
    let id = seeding_entry(&registry, "/watch/x.torrent", hash.as_str());
    registry.set_state(id, State::SeedEnded)?;

    let (mut dropper, _tx) = dropper(&registry, &engine, &fs);
    dropper.drop_transfer(&hash).await;
    dropper.drain().await;

    assert!(fs.contains(Path::new("/done/x/payload.bin")));
    assert!(fs.contains(Path::new("/watch/x.torrent")));
    assert!(registry.exists(id));
    assert_eq!(registry.state(id), Some(State::SeedEnded));
    Ok(())
}

#[tokio::test]
async fn dropper_ignores_unknown_hashes() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let fs = MockFileSystem::new();
    fs.add_file("/watch/y.torrent", "d");

    // Registry entry without an engine transfer.
    let id = seeding_entry(&registry, "/watch/y.torrent", "y");

    let (mut dropper, _tx) = dropper(&registry, &engine, &fs);
    dropper.drop_transfer(&IdentityHash::new("nobody")).await;
    dropper.drop_transfer(&IdentityHash::new("y")).await;
    dropper.drain().await;

    assert!(engine.stopped().is_empty());
    assert!(registry.exists(id));
    assert!(fs.contains(Path::new("/watch/y.torrent")));
    Ok(())
}

#[tokio::test]
async fn dropper_run_consumes_queue_until_cancelled() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let fs = MockFileSystem::new();
    fs.add_file("/watch/z.torrent", "d");
    fs.add_file("/work/z/payload.bin", "p");

    engine.submit(Path::new("/watch/z.torrent"))?;
    let hash = FakeEngine::hash_for("/watch/z.torrent");
    let id = seeding_entry(&registry, "/watch/z.torrent", hash.as_str());

    let (dropper, tx) = dropper(&registry, &engine, &fs);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(dropper.run(cancel.clone()));

    tx.send(hash).await?;
    wait_until("entry erased", || !registry.exists(id)).await;

    cancel.cancel();
    with_timeout(task).await?;
    assert!(fs.contains(Path::new("/done/z/payload.bin")));
    Ok(())
}

// ---------------------------------------------------------------------------
// Status reporter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_report_lists_every_item_in_id_order() -> TestResult {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let engine = Arc::new(FakeEngine::auto_resolving());
    let fs = MockFileSystem::new();

    // 1: freshly detected, nothing known yet.
    registry.register("/watch/new.torrent");

    // 2: downloading, half done.
    engine.set_layout(
        "/watch/movie.torrent",
        FakeLayout {
            name: "movie".into(),
            size: 2_000_000,
            files: vec![PathBuf::from("movie.mkv")],
        },
    );
    let handle = engine.submit(Path::new("/watch/movie.torrent"))?;
    let (movie, _) = registry.register("/watch/movie.torrent");
    registry.set_transfer_info(movie, handle.info().ok_or("no info")?)?;
    registry.set_state(movie, State::Downloading)?;
    engine
        .transfer(&FakeEngine::hash_for("/watch/movie.torrent"))
        .ok_or("no transfer")?
        .set_completed(500_000);

    // 3: seed ended, no progress line.
    let done = seeding_entry(&registry, "/watch/done.torrent", "done");
    registry.set_state(done, State::SeedEnded)?;

    let reporter = StatusReporter::new(
        Arc::clone(&registry),
        engine.clone(),
        Arc::new(fs.clone()),
        "/logs/status.txt",
        2,
    );

    let expected = "\
new.torrent
  size: unknown
  state: detected
  progress: 0.00%

movie
  size: 1.91 MB
  state: downloading
  progress: 25.00%

done
  size: 0.98 KB
  state: seed ended

";
    assert_eq!(reporter.render(), expected);

    reporter.write().await?;
    assert_eq!(
        fs.entry("/logs/status.txt"),
        Some(MockEntry::File(expected.as_bytes().to_vec()))
    );

    // Rewritten from scratch every cycle.
    registry.erase(movie);
    reporter.write().await?;
    let text = match fs.entry("/logs/status.txt") {
        Some(MockEntry::File(bytes)) => String::from_utf8(bytes)?,
        other => panic!("unexpected entry {other:?}"),
    };
    assert!(!text.contains("movie"));
    Ok(())
}

#[tokio::test]
async fn status_report_for_empty_registry_is_empty() -> TestResult {
    let fs = MockFileSystem::new();
    let reporter = StatusReporter::new(
        Arc::new(Registry::new()),
        Arc::new(FakeEngine::new()),
        Arc::new(fs.clone()),
        "/logs/status.txt",
        2,
    );
    reporter.write().await?;
    assert_eq!(fs.entry("/logs/status.txt"), Some(MockEntry::File(Vec::new())));
    assert!(fs.is_dir(Path::new("/logs")));
    Ok(())
}
