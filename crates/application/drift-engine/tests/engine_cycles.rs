use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{TimeZone, Utc};
use drift_core::{FileInfo, Manifest};
use drift_engine::{
    CycleState, EngineContext, EngineHooks, NoopNotifier, SyncConfig, SyncEngine, SyncEvent,
};
use drift_infra::SyncPools;
use drift_persistence::{MemorySettingsStore, SettingsStore};
use filetime::FileTime;
use tempfile::TempDir;

struct RecordingHooks {
    events: Mutex<Vec<SyncEvent>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingHooks {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        })
    }

    fn actions(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.action.clone(), e.path.clone()))
            .collect()
    }
}

impl EngineHooks for RecordingHooks {
    fn on_event(&self, event: &SyncEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_error(&self, path: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push(format!("{path}: {message}"));
    }
}

struct Rig {
    _dirs: (TempDir, TempDir, TempDir),
    source: Utf8PathBuf,
    target: Utf8PathBuf,
    store: Arc<MemorySettingsStore>,
    hooks: Arc<RecordingHooks>,
    engine: Arc<SyncEngine>,
}

fn rig(configure: impl FnOnce(&mut SyncConfig)) -> Rig {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let cfg = TempDir::new().unwrap();
    let source = Utf8PathBuf::from_path_buf(src.path().to_path_buf()).unwrap();
    let target = Utf8PathBuf::from_path_buf(dst.path().to_path_buf()).unwrap();
    let cache_dir = Utf8PathBuf::from_path_buf(cfg.path().to_path_buf()).unwrap();

    let mut config = SyncConfig::new(1, source.clone(), target.to_string());
    config.auto_approve_deletions = true;
    configure(&mut config);

    let store = Arc::new(MemorySettingsStore::new());
    let hooks = RecordingHooks::new();
    let engine = SyncEngine::new(
        config,
        EngineContext {
            pools: SyncPools::single(),
            store: store.clone(),
            cache_dir,
            hooks: hooks.clone(),
            notifier: Arc::new(NoopNotifier),
            dest_host: None,
            rsync_password: None,
            receiver_port: 8080,
        },
    )
    .unwrap();

    Rig {
        _dirs: (src, dst, cfg),
        source,
        target,
        store,
        hooks,
        engine,
    }
}

fn set_mtime(path: &Utf8PathBuf, secs: i64) {
    filetime::set_file_mtime(path.as_std_path(), FileTime::from_unix_time(secs, 0)).unwrap();
}

fn mtime_secs(path: &Utf8PathBuf) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_cycle_is_faithful_and_idempotent() {
    let rig = rig(|_| {});
    fs::create_dir_all(rig.source.join("Show/Season 1")).unwrap();
    fs::write(rig.source.join("Show/Season 1/e1.mkv"), b"episode-one").unwrap();
    fs::write(rig.source.join("Show/banner.jpg"), b"img").unwrap();
    set_mtime(&rig.source.join("Show/Season 1/e1.mkv"), 1_700_000_000);

    rig.engine.clone().run_sync(None).await;

    assert_eq!(
        fs::read(rig.target.join("Show/Season 1/e1.mkv")).unwrap(),
        b"episode-one"
    );
    assert!(rig.target.join("Show/banner.jpg").exists());
    // Source mtime carried over, second precision.
    assert_eq!(
        mtime_secs(&rig.target.join("Show/Season 1/e1.mkv")),
        1_700_000_000
    );

    let first_run_events = rig.hooks.actions();
    assert!(first_run_events
        .iter()
        .any(|(a, p)| a == "Added" && p == "Show/Season 1/e1.mkv"));
    assert!(first_run_events
        .iter()
        .any(|(a, p)| a == "Created" && p == "Show/Season 1"));

    // Second cycle with no source changes produces an empty plan.
    rig.engine.clone().run_sync(None).await;
    assert_eq!(rig.hooks.actions(), first_run_events);
    assert_eq!(rig.engine.status().state, CycleState::Idle);

    // The receiver model was persisted for the next start.
    let cached = rig._dirs.2.path().join("receiver_cache_1.json");
    assert!(cached.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn receiver_owned_subtrees_survive() {
    let rig = rig(|c| c.rule = drift_core::SyncRule::Series);
    fs::create_dir_all(rig.source.join("Avatar")).unwrap();
    fs::write(rig.source.join("Avatar/movie.nfo"), b"nfo").unwrap();
    set_mtime(&rig.source.join("Avatar/movie.nfo"), 1_000);

    // Receiver mirrors Avatar and owns Matrix outright.
    fs::create_dir_all(rig.target.join("Avatar")).unwrap();
    fs::write(rig.target.join("Avatar/movie.nfo"), b"nfo").unwrap();
    set_mtime(&rig.target.join("Avatar/movie.nfo"), 1_000);
    fs::create_dir_all(rig.target.join("Matrix")).unwrap();
    fs::write(rig.target.join("Matrix/m.mkv"), b"matrix").unwrap();

    rig.engine.clone().run_sync(None).await;

    assert!(rig.target.join("Matrix/m.mkv").exists());
    assert!(rig.target.join("Avatar/movie.nfo").exists());
    assert!(rig.hooks.actions().is_empty(), "plan should be empty");
}

#[tokio::test(flavor = "multi_thread")]
async fn renames_are_detected_and_executed() {
    let rig = rig(|c| c.rule = drift_core::SyncRule::Series);
    fs::create_dir_all(rig.source.join("S1")).unwrap();
    fs::write(rig.source.join("S1/ep1.mkv"), b"same-bytes").unwrap();
    set_mtime(&rig.source.join("S1/ep1.mkv"), 5_000);

    fs::create_dir_all(rig.target.join("S1")).unwrap();
    fs::write(rig.target.join("S1/old.mkv"), b"same-bytes").unwrap();
    set_mtime(&rig.target.join("S1/old.mkv"), 5_000);

    rig.engine.clone().run_sync(None).await;

    assert!(!rig.target.join("S1/old.mkv").exists());
    assert_eq!(fs::read(rig.target.join("S1/ep1.mkv")).unwrap(), b"same-bytes");
    let actions = rig.hooks.actions();
    assert!(actions.iter().any(|(a, p)| a == "Renamed" && p == "S1/ep1.mkv"));
    assert!(!actions.iter().any(|(a, _)| a == "Added"));
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_mode_gates_conflicts_until_approved() {
    let rig = rig(|_| {});
    rig.store.save_setting("sync_mode", "manual").unwrap();

    fs::write(rig.source.join("a.txt"), b"new-bytes!").unwrap(); // 10 bytes
    set_mtime(&rig.source.join("a.txt"), 10_001);
    fs::write(rig.target.join("a.txt"), b"old-bytes").unwrap(); // 9 bytes
    set_mtime(&rig.target.join("a.txt"), 10_000);

    rig.engine.clone().run_sync(None).await;

    // Gated: nothing written, approval pending on the conflicting path.
    assert_eq!(fs::read(rig.target.join("a.txt")).unwrap(), b"old-bytes");
    assert!(rig.engine.is_waiting_for_approval());
    assert_eq!(rig.engine.pending_deletions(), vec!["a.txt".to_string()]);
    assert_eq!(rig.engine.status().state, CycleState::WaitingApproval);

    rig.engine.approve_specific_changes(&["a.txt".to_string()]);

    // The approval respawns the cycle asynchronously.
    for _ in 0..100 {
        if fs::read(rig.target.join("a.txt")).unwrap() == b"new-bytes!" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(fs::read(rig.target.join("a.txt")).unwrap(), b"new-bytes!");
    assert_eq!(mtime_secs(&rig.target.join("a.txt")), 10_001);
    assert!(!rig.engine.is_waiting_for_approval());
}

#[tokio::test(flavor = "multi_thread")]
async fn type_changes_clear_the_receiver_side_before_writing() {
    // A receiver directory where the sender has a file.
    let rig = rig(|_| {});
    fs::write(rig.source.join("entry"), b"now-a-file").unwrap();
    fs::create_dir_all(rig.target.join("entry")).unwrap();
    fs::write(rig.target.join("entry/leftover.mkv"), b"old").unwrap();

    rig.engine.clone().run_sync(None).await;

    assert!(rig.target.join("entry").is_file());
    assert_eq!(fs::read(rig.target.join("entry")).unwrap(), b"now-a-file");

    // And the mirror: a receiver file where the sender has a directory.
    let rig2 = self::rig(|_| {});
    fs::create_dir_all(rig2.source.join("entry")).unwrap();
    fs::write(rig2.source.join("entry/child.mkv"), b"nested").unwrap();
    fs::write(rig2.target.join("entry"), b"was-a-file").unwrap();

    rig2.engine.clone().run_sync(None).await;

    assert!(rig2.target.join("entry").is_dir());
    assert_eq!(
        fs::read(rig2.target.join("entry/child.mkv")).unwrap(),
        b"nested"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_source_never_wipes_the_target() {
    let rig = rig(|_| {});
    for i in 0..5 {
        fs::write(rig.target.join(format!("f{i}.mkv")), b"data").unwrap();
    }

    rig.engine.clone().run_sync(None).await;

    for i in 0..5 {
        assert!(rig.target.join(format!("f{i}.mkv")).exists());
    }
    assert_eq!(rig.engine.status().error_count, 1);
    assert!(rig.hooks.actions().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_emits_prefixed_events_without_io() {
    let rig = rig(|_| {});
    rig.store.save_setting("sync_mode", "dry").unwrap();
    fs::create_dir_all(rig.source.join("Show")).unwrap();
    fs::write(rig.source.join("Show/e1.mkv"), b"bytes").unwrap();

    rig.engine.clone().run_sync(None).await;

    assert!(!rig.target.join("Show").exists());
    let actions = rig.hooks.actions();
    assert!(actions.iter().any(|(a, p)| a == "DRY-Created" && p == "Show"));
    assert!(actions.iter().any(|(a, p)| a == "DRY-Added" && p == "Show/e1.mkv"));
    assert!(actions.iter().all(|(a, _)| a.starts_with("DRY-")));
}

#[tokio::test(flavor = "multi_thread")]
async fn paused_engine_skips_cycles() {
    let rig = rig(|_| {});
    fs::write(rig.source.join("a.txt"), b"data").unwrap();

    rig.engine.pause();
    rig.engine.clone().run_sync(None).await;
    assert!(!rig.target.join("a.txt").exists());
    assert!(rig.hooks.actions().is_empty());

    rig.engine.resume();
    for _ in 0..100 {
        if rig.target.join("a.txt").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(rig.target.join("a.txt").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_coalesce_to_the_most_recent() {
    let rig = rig(|c| c.bandwidth_limit = 64 * 1024);

    fs::create_dir_all(rig.source.join("Data")).unwrap();
    fs::write(rig.source.join("Data/big.bin"), vec![9u8; 256 * 1024]).unwrap();
    fs::write(rig.source.join("Data/only_b.txt"), b"b").unwrap();
    fs::write(rig.source.join("Data/only_d.txt"), b"dd").unwrap();

    let manifest_of = |names: &[&str]| {
        let mut m = Manifest::new(rig.source.as_str());
        m.add(FileInfo::dir("Data", Utc.timestamp_opt(1, 0).unwrap()));
        for name in names {
            let path = rig.source.join("Data").join(name);
            let meta = fs::metadata(&path).unwrap();
            m.add(FileInfo::file(
                format!("Data/{name}"),
                meta.len() as i64,
                Utc.timestamp_opt(
                    FileTime::from_last_modification_time(&meta).unix_seconds(),
                    0,
                )
                .unwrap(),
            ));
        }
        m
    };

    // Cycle A: the 256 KiB copy at 64 KiB/s holds the engine busy.
    let slow = tokio::spawn(rig.engine.clone().run_sync(Some(manifest_of(&["big.bin"]))));
    tokio::time::sleep(Duration::from_millis(600)).await;

    // B, C, D arrive while A is executing; only D survives the queue.
    rig.engine
        .clone()
        .run_sync(Some(manifest_of(&["only_b.txt"])))
        .await;
    rig.engine.clone().run_sync(None).await;
    rig.engine
        .clone()
        .run_sync(Some(manifest_of(&["only_d.txt"])))
        .await;

    slow.await.unwrap();

    // Wait for the single follow-up cycle to finish.
    for _ in 0..150 {
        if rig.target.join("Data/only_d.txt").exists()
            && !rig.target.join("Data/big.bin").exists()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // The follow-up ran with D's manifest: only_d synced, big.bin (absent
    // from D) deleted, and B's file never copied.
    assert!(rig.target.join("Data/only_d.txt").exists());
    assert!(!rig.target.join("Data/only_b.txt").exists());
    assert!(!rig.target.join("Data/big.bin").exists());

    // The persisted queue slot was consumed.
    assert_eq!(
        rig.store
            .get_setting("engine_queue_1")
            .unwrap()
            .unwrap_or_default(),
        ""
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn start_restores_state_and_kicks_the_initial_sync() {
    let rig = rig(|_| {});
    fs::write(rig.source.join("boot.mkv"), b"payload").unwrap();

    // Pre-seed persisted approval state, as if a gate was pending when the
    // process died.
    drift_persistence::save_approval_state(
        rig.store.as_ref(),
        1,
        &drift_persistence::ApprovalState {
            waiting_for_approval: true,
            pending_deletions: vec!["ghost.mkv".to_string()],
            conflicts: Vec::new(),
        },
    )
    .unwrap();

    rig.engine.clone().start();

    assert!(rig.engine.is_waiting_for_approval());
    assert_eq!(rig.engine.pending_deletions(), vec!["ghost.mkv".to_string()]);

    // The initial sync still runs (the persisted gate only re-arms the
    // approval flags; this cycle has nothing destructive in it).
    for _ in 0..100 {
        if rig.target.join("boot.mkv").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(rig.target.join("boot.mkv").exists());

    rig.engine.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn deletions_wait_for_approval_without_auto_approve() {
    let rig = rig(|c| c.auto_approve_deletions = false);
    fs::create_dir_all(rig.source.join("Show")).unwrap();
    fs::write(rig.source.join("Show/keep.mkv"), b"k").unwrap();
    set_mtime(&rig.source.join("Show/keep.mkv"), 100);

    fs::create_dir_all(rig.target.join("Show")).unwrap();
    fs::write(rig.target.join("Show/keep.mkv"), b"k").unwrap();
    set_mtime(&rig.target.join("Show/keep.mkv"), 100);
    fs::write(rig.target.join("Show/stale.mkv"), b"s").unwrap();

    rig.engine.clone().run_sync(None).await;

    assert!(rig.target.join("Show/stale.mkv").exists());
    assert!(rig.engine.is_waiting_for_approval());
    assert_eq!(
        rig.engine.pending_deletions(),
        vec!["Show/stale.mkv".to_string()]
    );

    rig.engine.approve_deletions();
    for _ in 0..100 {
        if !rig.target.join("Show/stale.mkv").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!rig.target.join("Show/stale.mkv").exists());
    assert!(rig.target.join("Show/keep.mkv").exists());
}
