//! A sender engine driving a real receiver over HTTP: remote manifest
//! scan plus remote deletion. Remote copies go through the external rsync
//! binary and are covered elsewhere; this flow stays self-contained.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use drift_engine::{EngineContext, NoopHooks, NoopNotifier, SyncConfig, SyncEngine};
use drift_infra::SyncPools;
use drift_persistence::MemorySettingsStore;
use drift_server::ReceiverState;
use filetime::FileTime;
use tempfile::TempDir;

fn utf8(p: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(p.to_path_buf()).unwrap()
}

fn set_mtime(path: &Utf8PathBuf, secs: i64) {
    filetime::set_file_mtime(path.as_std_path(), FileTime::from_unix_time(secs, 0)).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sender_prunes_receiver_extras_over_http() {
    let source_dir = TempDir::new().unwrap();
    let receiver_dir = TempDir::new().unwrap();
    let cfg_dir = TempDir::new().unwrap();
    let source = utf8(source_dir.path());
    let receiver_root = utf8(receiver_dir.path());

    // Source and receiver agree on keep.mkv; the receiver carries an extra
    // episode the source dropped.
    fs::create_dir_all(source.join("Show")).unwrap();
    fs::write(source.join("Show/keep.mkv"), b"payload").unwrap();
    set_mtime(&source.join("Show/keep.mkv"), 42_000);

    fs::create_dir_all(receiver_root.join("Show")).unwrap();
    fs::write(receiver_root.join("Show/keep.mkv"), b"payload").unwrap();
    set_mtime(&receiver_root.join("Show/keep.mkv"), 42_000);
    fs::write(receiver_root.join("Show/extra.mkv"), b"stale").unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = ReceiverState::new(receiver_root.clone(), SyncPools::single());
    let server = tokio::spawn(async move {
        drift_server::serve(state, listener).await.unwrap();
    });

    let mut config = SyncConfig::new(7, source.clone(), "127.0.0.1::media");
    config.rule = drift_core::SyncRule::Series;
    config.auto_approve_deletions = true;
    let engine = SyncEngine::new(
        config,
        EngineContext {
            pools: SyncPools::single(),
            store: Arc::new(MemorySettingsStore::new()),
            cache_dir: utf8(cfg_dir.path()),
            hooks: Arc::new(NoopHooks),
            notifier: Arc::new(NoopNotifier),
            dest_host: None,
            rsync_password: None,
            receiver_port: port,
        },
    )
    .unwrap();

    engine.clone().run_sync(None).await;

    for _ in 0..50 {
        if !receiver_root.join("Show/extra.mkv").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!receiver_root.join("Show/extra.mkv").exists());
    assert!(receiver_root.join("Show/keep.mkv").exists());

    // The engine's receiver model dropped the extra too.
    let model = engine.target_manifest();
    assert!(model.has_file("Show/keep.mkv"));
    assert!(!model.has_file("Show/extra.mkv"));

    server.abort();
}
