//! Background loops owned by each engine: the filesystem watcher, the
//! periodic full sync, the source poller, and the failed-file retry. All
//! of them observe the engine's cancellation token within one tick.

use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::engine::SyncEngine;

const WATCH_DEBOUNCE: Duration = Duration::from_secs(5);
const FAILED_RETRY_INTERVAL: Duration = Duration::from_secs(3600);

pub(crate) fn spawn_all(engine: Arc<SyncEngine>) {
    spawn_watch_loop(engine.clone());
    spawn_periodic_loop(engine.clone());
    spawn_poll_loop(engine.clone());
    spawn_failed_retry_loop(engine);
}

/// Filesystem events debounce for five seconds of quiet, then trigger a
/// fresh cycle. Only write/create/remove/rename events count, and only for
/// paths the scan filter would keep.
fn spawn_watch_loop(engine: Arc<SyncEngine>) {
    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = match notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
        ) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(engine = engine.config.id, error = %e, "watcher init failed");
                return;
            }
        };
        if let Err(e) = watcher.watch(
            engine.config.source_dir.as_std_path(),
            RecursiveMode::Recursive,
        ) {
            warn!(engine = engine.config.id, error = %e, "watch registration failed");
            return;
        }

        let mut deadline: Option<tokio::time::Instant> = None;
        loop {
            tokio::select! {
                _ = engine.cancel.cancelled() => break,
                received = rx.recv() => {
                    match received {
                        Some(event) if is_relevant(&engine, &event) => {
                            deadline = Some(tokio::time::Instant::now() + WATCH_DEBOUNCE);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    deadline = None;
                    debug!(engine = engine.config.id, "watch debounce elapsed");
                    engine.spawn_sync(None);
                }
            }
        }
        debug!(engine = engine.config.id, "watch loop stopped");
    });
}

fn is_relevant(engine: &SyncEngine, event: &notify::Event) -> bool {
    let kind_counts = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
    );
    if !kind_counts {
        return false;
    }
    event.paths.iter().any(|path| {
        match path.strip_prefix(engine.config.source_dir.as_std_path()) {
            Ok(rel) => !engine.filter.is_excluded(&rel.to_string_lossy().replace('\\', "/")),
            Err(_) => false,
        }
    })
}

/// Full sync every `watch_interval`, as a backstop for anything the
/// watcher missed.
fn spawn_periodic_loop(engine: Arc<SyncEngine>) {
    let period = engine.config.watch_interval;
    if period.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = engine.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(engine = engine.config.id, "periodic sync tick");
                    engine.spawn_sync(None);
                }
            }
        }
    });
}

/// Scan-only diff against the last known source. Overlay and network
/// mounts drop inotify events; this loop catches what they lose.
fn spawn_poll_loop(engine: Arc<SyncEngine>) {
    let period = engine.config.poll_interval;
    if period.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = engine.cancel.cancelled() => break,
                _ = ticker.tick() => poll_once(&engine).await,
            }
        }
    });
}

async fn poll_once(engine: &Arc<SyncEngine>) {
    if engine.is_paused() {
        return;
    }
    let current = match engine.scan_source().await {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(engine = engine.config.id, error = %e, "poll scan failed");
            return;
        }
    };
    let changed = {
        let st = engine.state();
        st.last_source_manifest
            .as_ref()
            .map(|last| last != &current)
            .unwrap_or(true)
    };
    if changed {
        debug!(engine = engine.config.id, "poll detected source change");
        engine.spawn_sync(Some(current));
    }
}

/// Hourly retry of anything in the failed set.
fn spawn_failed_retry_loop(engine: Arc<SyncEngine>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + FAILED_RETRY_INTERVAL,
            FAILED_RETRY_INTERVAL,
        );
        loop {
            tokio::select! {
                _ = engine.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let has_failures = !engine.state().failed_files.is_empty();
                    if has_failures {
                        debug!(engine = engine.config.id, "retrying failed files");
                        engine.spawn_sync(None);
                    }
                }
            }
        }
    });
}
