use std::fs;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use drift_core::target;
use filetime::FileTime;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{rsync, TransferError};

/// Files at or above this size copy in parallel streams when no bandwidth
/// limit is active.
pub const PARALLEL_COPY_THRESHOLD: u64 = 100 * 1024 * 1024;
pub const PARALLEL_STREAMS: u64 = 4;
const PARALLEL_CHUNK: usize = 128 * 1024;
const SEQUENTIAL_CHUNK: usize = 32 * 1024;

const MAX_ATTEMPTS: u32 = 3;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Behavior-injection points for a single transfer. `on_progress` receives
/// cumulative bytes for the current file; `is_paused` is consulted at every
/// chunk boundary.
#[derive(Clone)]
pub struct TransferHooks {
    pub on_progress: Arc<dyn Fn(u64) + Send + Sync>,
    pub on_complete: Arc<dyn Fn(&str, u64, Option<&TransferError>) + Send + Sync>,
    pub is_paused: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl TransferHooks {
    pub fn noop() -> Self {
        Self {
            on_progress: Arc::new(|_| {}),
            on_complete: Arc::new(|_, _, _| {}),
            is_paused: Arc::new(|| false),
        }
    }
}

/// Executes single file and directory operations against a local or remote
/// target. Every copy holds a slot of the shared transfer semaphore.
pub struct Transferer {
    transfer_pool: Arc<Semaphore>,
    receiver: crate::ReceiverClient,
    rsync_password: Option<String>,
}

impl Transferer {
    pub fn new(
        transfer_pool: Arc<Semaphore>,
        receiver: crate::ReceiverClient,
        rsync_password: Option<String>,
    ) -> Self {
        Self {
            transfer_pool,
            receiver,
            rsync_password,
        }
    }

    /// Copy one file. `dst` is either an absolute local path or an
    /// rsync-style remote URI. Up to three attempts with 1/2/4 s backoff;
    /// a pause aborts immediately and is not retried.
    pub async fn copy_file(
        &self,
        src: &Utf8Path,
        dst: &str,
        rel_path: &str,
        bandwidth_limit: u64,
        hooks: &TransferHooks,
    ) -> Result<u64, TransferError> {
        let _permit = self
            .transfer_pool
            .acquire()
            .await
            .map_err(|_| TransferError::PoolClosed)?;

        let mut last_err = TransferError::PoolClosed;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
                debug!(path = rel_path, attempt, "retrying transfer");
            }

            let result = if target::is_remote_target(dst) {
                rsync::rsync_copy(
                    src,
                    dst,
                    bandwidth_limit,
                    self.rsync_password.as_deref(),
                    hooks,
                )
                .await
            } else {
                let src = src.to_owned();
                let dst_path = Utf8PathBuf::from(dst);
                let dst_desc = dst.to_string();
                let hooks_inner = hooks.clone();
                let bw = bandwidth_limit;
                tokio::task::spawn_blocking(move || copy_local(&src, &dst_path, bw, &hooks_inner))
                    .await
                    .map_err(|e| TransferError::Write {
                        path: dst_desc,
                        source: std::io::Error::other(e),
                    })?
            };

            match result {
                Ok(bytes) => {
                    (hooks.on_complete)(rel_path, bytes, None);
                    return Ok(bytes);
                }
                Err(err) if err.is_paused() => {
                    (hooks.on_complete)(rel_path, 0, Some(&err));
                    return Err(err);
                }
                Err(err) => {
                    warn!(path = rel_path, error = %err, attempt, "transfer attempt failed");
                    last_err = err;
                }
            }
        }

        (hooks.on_complete)(rel_path, 0, Some(&last_err));
        Err(last_err)
    }

    /// MkdirAll for local targets. Remote targets are a no-op: rsync
    /// creates directories implicitly via `--mkpath`.
    pub async fn create_dir(&self, dst: &str) -> Result<(), TransferError> {
        if target::is_remote_target(dst) {
            return Ok(());
        }
        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|source| TransferError::Write {
                path: dst.to_string(),
                source,
            })
    }

    pub async fn delete_file(&self, dst: &str, rel_path: &str) -> Result<(), TransferError> {
        if target::is_remote_target(dst) {
            let host = self.remote_host(dst)?;
            return self.receiver.delete(&host, rel_path, false).await;
        }
        match tokio::fs::remove_file(dst).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TransferError::Write {
                path: dst.to_string(),
                source,
            }),
        }
    }

    pub async fn delete_dir(&self, dst: &str, rel_path: &str) -> Result<(), TransferError> {
        if target::is_remote_target(dst) {
            let host = self.remote_host(dst)?;
            return self.receiver.delete(&host, rel_path, true).await;
        }
        match tokio::fs::remove_dir_all(dst).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TransferError::Write {
                path: dst.to_string(),
                source,
            }),
        }
    }

    /// Local rename, falling back to copy+delete when the rename crosses a
    /// device boundary. Remote targets cannot rename.
    pub async fn rename_file(&self, from: &str, to: &str) -> Result<(), TransferError> {
        if target::is_remote_target(from) || target::is_remote_target(to) {
            return Err(TransferError::RemoteApi(
                "rename is not supported for remote targets".to_string(),
            ));
        }
        if let Some(parent) = Utf8Path::new(to).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TransferError::Write {
                    path: parent.to_string(),
                    source,
                })?;
        }
        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                tokio::fs::copy(from, to)
                    .await
                    .map_err(|source| TransferError::Write {
                        path: to.to_string(),
                        source,
                    })?;
                tokio::fs::remove_file(from)
                    .await
                    .map_err(|source| TransferError::Write {
                        path: from.to_string(),
                        source,
                    })?;
                Ok(())
            }
            Err(source) => Err(TransferError::Rename {
                from: from.to_string(),
                to: to.to_string(),
                source,
            }),
        }
    }

    fn remote_host(&self, dst: &str) -> Result<String, TransferError> {
        target::host_of(dst, self.receiver.dest_host())
            .ok_or_else(|| TransferError::RemoteApi(format!("no host for target {dst}")))
    }
}

/// Rate pacer for the sequential copy path. Permits are 1 KiB cells so
/// pacing stays smooth at low limits.
struct Pacer {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl Pacer {
    fn new(bytes_per_second: u64) -> Self {
        let limiter = (bytes_per_second > 0).then(|| {
            let cells = NonZeroU32::new((bytes_per_second / 1024).min(u32::MAX as u64) as u32)
                .unwrap_or(nonzero!(1u32));
            RateLimiter::direct(Quota::per_second(cells))
        });
        Self { limiter }
    }

    fn pace(&self, bytes: usize) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let cells = (bytes as u64).div_ceil(1024).min(u32::MAX as u64) as u32;
        for _ in 0..cells.max(1) {
            while limiter.check().is_err() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Rate-limits progress callbacks to one per 500 ms and keeps the reported
/// cumulative count monotonic across parallel streams.
struct ProgressGate {
    last_emit: Option<Instant>,
    high_water: u64,
}

impl ProgressGate {
    fn new() -> Self {
        Self {
            last_emit: None,
            high_water: 0,
        }
    }

    fn emit(&mut self, bytes: u64, cb: &Arc<dyn Fn(u64) + Send + Sync>) {
        if bytes <= self.high_water {
            return;
        }
        let due = self
            .last_emit
            .map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
        if due {
            self.high_water = bytes;
            self.last_emit = Some(Instant::now());
            cb(bytes);
        }
    }

    fn finish(&mut self, bytes: u64, cb: &Arc<dyn Fn(u64) + Send + Sync>) {
        if bytes > self.high_water {
            self.high_water = bytes;
            cb(bytes);
        }
    }
}

fn copy_local(
    src: &Utf8Path,
    dst: &Utf8Path,
    bandwidth_limit: u64,
    hooks: &TransferHooks,
) -> Result<u64, TransferError> {
    let meta = fs::metadata(src).map_err(|source| TransferError::Open {
        path: src.to_string(),
        source,
    })?;
    let total = meta.len();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|source| TransferError::Write {
            path: parent.to_string(),
            source,
        })?;
    }

    let tmp = Utf8PathBuf::from(format!("{dst}.tmp"));
    let copied = if total >= PARALLEL_COPY_THRESHOLD && bandwidth_limit == 0 {
        parallel_copy(src, &tmp, total, hooks)
    } else {
        sequential_copy(src, &tmp, bandwidth_limit, hooks)
    };

    let copied = match copied {
        Ok(bytes) => bytes,
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
    };

    // Carry the source mtime so the next scan sees the pair as in sync,
    // then publish atomically.
    let finish = || -> Result<(), TransferError> {
        let src_mtime = FileTime::from_last_modification_time(&meta);
        filetime::set_file_mtime(tmp.as_std_path(), src_mtime).map_err(|source| {
            TransferError::Write {
                path: tmp.to_string(),
                source,
            }
        })?;
        fs::rename(&tmp, dst).map_err(|source| TransferError::Rename {
            from: tmp.to_string(),
            to: dst.to_string(),
            source,
        })
    };

    match finish() {
        Ok(()) => Ok(copied),
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

fn sequential_copy(
    src: &Utf8Path,
    tmp: &Utf8Path,
    bandwidth_limit: u64,
    hooks: &TransferHooks,
) -> Result<u64, TransferError> {
    let mut reader = fs::File::open(src).map_err(|source| TransferError::Open {
        path: src.to_string(),
        source,
    })?;
    let mut writer = fs::File::create(tmp).map_err(|source| TransferError::Write {
        path: tmp.to_string(),
        source,
    })?;

    let pacer = Pacer::new(bandwidth_limit);
    let mut gate = ProgressGate::new();
    let mut buf = vec![0u8; SEQUENTIAL_CHUNK];
    let mut done: u64 = 0;

    loop {
        if (hooks.is_paused)() {
            return Err(TransferError::Paused);
        }
        let n = reader.read(&mut buf).map_err(|source| TransferError::Open {
            path: src.to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .map_err(|source| TransferError::Write {
                path: tmp.to_string(),
                source,
            })?;
        done += n as u64;
        pacer.pace(n);
        gate.emit(done, &hooks.on_progress);
    }

    writer.sync_all().map_err(|source| TransferError::Write {
        path: tmp.to_string(),
        source,
    })?;
    gate.finish(done, &hooks.on_progress);
    Ok(done)
}

#[cfg(unix)]
fn parallel_copy(
    src: &Utf8Path,
    tmp: &Utf8Path,
    total: u64,
    hooks: &TransferHooks,
) -> Result<u64, TransferError> {
    use std::os::unix::fs::FileExt;

    let reader = fs::File::open(src).map_err(|source| TransferError::Open {
        path: src.to_string(),
        source,
    })?;
    let writer = fs::File::create(tmp).map_err(|source| TransferError::Write {
        path: tmp.to_string(),
        source,
    })?;
    writer.set_len(total).map_err(|source| TransferError::Write {
        path: tmp.to_string(),
        source,
    })?;

    let stream_len = total.div_ceil(PARALLEL_STREAMS);
    let transferred = AtomicU64::new(0);
    let gate = Mutex::new(ProgressGate::new());

    let results: Vec<Result<(), TransferError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..PARALLEL_STREAMS)
            .map(|stream| {
                let reader = &reader;
                let writer = &writer;
                let transferred = &transferred;
                let gate = &gate;
                scope.spawn(move || -> Result<(), TransferError> {
                    let start = stream * stream_len;
                    let end = (start + stream_len).min(total);
                    let mut offset = start;
                    let mut buf = vec![0u8; PARALLEL_CHUNK];
                    while offset < end {
                        if (hooks.is_paused)() {
                            return Err(TransferError::Paused);
                        }
                        let want = ((end - offset) as usize).min(PARALLEL_CHUNK);
                        let n = reader.read_at(&mut buf[..want], offset).map_err(|source| {
                            TransferError::Open {
                                path: src.to_string(),
                                source,
                            }
                        })?;
                        if n == 0 {
                            break; // source truncated underneath us
                        }
                        writer
                            .write_all_at(&buf[..n], offset)
                            .map_err(|source| TransferError::Write {
                                path: tmp.to_string(),
                                source,
                            })?;
                        offset += n as u64;
                        let cumulative =
                            transferred.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                        if let Ok(mut g) = gate.lock() {
                            g.emit(cumulative, &hooks.on_progress);
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(TransferError::Write {
                        path: tmp.to_string(),
                        source: std::io::Error::other("copy stream panicked"),
                    })
                })
            })
            .collect()
    });

    for result in results {
        result?;
    }

    writer.sync_all().map_err(|source| TransferError::Write {
        path: tmp.to_string(),
        source,
    })?;
    let done = transferred.load(Ordering::Relaxed);
    if let Ok(mut g) = gate.lock() {
        g.finish(done, &hooks.on_progress);
    }
    Ok(done)
}

#[cfg(not(unix))]
fn parallel_copy(
    src: &Utf8Path,
    tmp: &Utf8Path,
    _total: u64,
    hooks: &TransferHooks,
) -> Result<u64, TransferError> {
    sequential_copy(src, tmp, 0, hooks)
}
