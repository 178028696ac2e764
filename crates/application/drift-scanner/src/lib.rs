use std::fs;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use drift_core::path_utils::DriftPath;
use drift_core::{FileInfo, Manifest};
use tracing::{debug, warn};

pub mod filter;
pub mod remote;

pub use filter::ScanFilter;
pub use remote::scan_remote;

/// Worker count for the local scan pool.
pub const DEFAULT_SCAN_WORKERS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("remote manifest fetch from {url} failed: {detail}")]
    Remote { url: String, detail: String },
    #[error("scan cancelled")]
    Cancelled,
    #[error("scan pool error: {0}")]
    Pool(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub workers: usize,
    /// Content hashing is opt-in; change detection runs on size + mtime.
    pub hash_files: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_SCAN_WORKERS,
            hash_files: false,
        }
    }
}

struct ScanContext {
    root: Utf8PathBuf,
    filter: ScanFilter,
    options: ScanOptions,
    manifest: Mutex<Manifest>,
    error: Mutex<Option<ScanError>>,
    cancelled: AtomicBool,
    external_cancel: Option<Arc<AtomicBool>>,
}

impl ScanContext {
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        if let Some(c) = &self.external_cancel {
            if c.load(Ordering::Relaxed) {
                self.cancelled.store(true, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// First error wins; later workers observe the cancel flag and drain.
    fn fail(&self, err: ScanError) {
        let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

pub struct Scanner;

impl Scanner {
    /// Modification time truncated to whole seconds, the comparison
    /// granularity across hosts.
    pub fn mtime(meta: &fs::Metadata) -> DateTime<Utc> {
        let secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }

    /// Walk `root` with a bounded worker pool and materialize a manifest.
    /// Workers fan out per directory; the first read failure cancels the
    /// whole scan.
    pub fn scan_local(
        root: &Utf8Path,
        filter: ScanFilter,
        options: ScanOptions,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Manifest, ScanError> {
        debug!(root = %root, workers = options.workers, "starting local scan");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .build()
            .map_err(|e| ScanError::Pool(e.to_string()))?;

        let ctx = ScanContext {
            root: root.to_owned(),
            filter,
            options,
            manifest: Mutex::new(Manifest::new(root.as_str())),
            error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            external_cancel: cancel,
        };

        pool.scope(|s| scan_dir(s, ctx.root.clone(), &ctx));

        if let Some(err) = ctx.error.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(err);
        }
        if ctx.cancelled.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }

        let manifest = ctx
            .manifest
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        debug!(
            root = %root,
            files = manifest.file_count(),
            dirs = manifest.dir_count(),
            "local scan complete"
        );
        Ok(manifest)
    }
}

fn scan_dir<'s>(scope: &rayon::Scope<'s>, dir: Utf8PathBuf, ctx: &'s ScanContext) {
    if ctx.is_cancelled() {
        return;
    }

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(source) => {
            ctx.fail(ScanError::Io {
                path: dir.to_string(),
                source,
            });
            return;
        }
    };

    for entry in entries {
        if ctx.is_cancelled() {
            return;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                ctx.fail(ScanError::Io {
                    path: dir.to_string(),
                    source,
                });
                return;
            }
        };

        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            warn!(dir = %dir, "skipping entry with non-UTF8 name");
            continue;
        };

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(source) => {
                ctx.fail(ScanError::Io {
                    path: path.to_string(),
                    source,
                });
                return;
            }
        };

        let rel = match path.strip_prefix(&ctx.root) {
            Ok(rel) => DriftPath::normalize(rel.as_str()),
            Err(_) => continue,
        };
        if rel.is_empty() || ctx.filter.is_excluded(&rel) {
            continue;
        }

        if meta.is_dir() {
            let info = FileInfo::dir(rel, Scanner::mtime(&meta));
            ctx.manifest
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .add(info);
            scope.spawn(move |s| scan_dir(s, path, ctx));
        } else if meta.is_file() {
            if !ctx.filter.is_included(&rel) {
                continue;
            }
            let hash = if ctx.options.hash_files {
                match hash_file(&path) {
                    Ok(h) => h,
                    Err(source) => {
                        ctx.fail(ScanError::Io {
                            path: path.to_string(),
                            source,
                        });
                        return;
                    }
                }
            } else {
                String::new()
            };
            let info = FileInfo {
                path: rel,
                size: meta.len() as i64,
                mod_time: Scanner::mtime(&meta),
                is_dir: false,
                hash,
            };
            ctx.manifest
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .add(info);
        }
        // Symlinks and special files are not carried in manifests.
    }
}

fn hash_file(path: &Utf8Path) -> Result<String, std::io::Error> {
    let mut file = fs::File::open(path)?;
    let mut hasher = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.consume(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn utf8_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn scan_records_files_dirs_and_relative_paths() {
        let tmp = tempdir().unwrap();
        let root = utf8_root(&tmp);
        fs::create_dir_all(root.join("Show/Season 1")).unwrap();
        fs::write(root.join("Show/Season 1/e1.mkv"), b"abc").unwrap();
        fs::write(root.join("top.nfo"), b"x").unwrap();

        let manifest =
            Scanner::scan_local(&root, ScanFilter::empty(), ScanOptions::default(), None).unwrap();

        assert!(manifest.has_dir("Show"));
        assert!(manifest.has_dir("Show/Season 1"));
        let f = manifest.get_file("Show/Season 1/e1.mkv").unwrap();
        assert_eq!(f.size, 3);
        assert!(!f.is_dir);
        assert!(manifest.has_file("top.nfo"));
        assert_eq!(manifest.file_count(), 2);
    }

    #[test]
    fn excluded_directories_are_not_descended() {
        let tmp = tempdir().unwrap();
        let root = utf8_root(&tmp);
        fs::create_dir_all(root.join(".grab/deep")).unwrap();
        fs::write(root.join(".grab/deep/file.bin"), b"zz").unwrap();
        fs::write(root.join("keep.mkv"), b"zz").unwrap();

        let filter = ScanFilter::new(&[".grab".to_string()], &[]).unwrap();
        let manifest =
            Scanner::scan_local(&root, filter, ScanOptions::default(), None).unwrap();

        assert!(!manifest.has_dir(".grab"));
        assert!(!manifest.has_file(".grab/deep/file.bin"));
        assert!(manifest.has_file("keep.mkv"));
    }

    #[test]
    fn include_list_filters_files_not_dirs() {
        let tmp = tempdir().unwrap();
        let root = utf8_root(&tmp);
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/a.mkv"), b"1").unwrap();
        fs::write(root.join("sub/a.srt"), b"1").unwrap();

        let filter = ScanFilter::new(&[], &["*.mkv".to_string()]).unwrap();
        let manifest =
            Scanner::scan_local(&root, filter, ScanOptions::default(), None).unwrap();

        assert!(manifest.has_dir("sub"));
        assert!(manifest.has_file("sub/a.mkv"));
        assert!(!manifest.has_file("sub/a.srt"));
    }

    #[test]
    fn cancel_flag_aborts_the_scan() {
        let tmp = tempdir().unwrap();
        let root = utf8_root(&tmp);
        fs::write(root.join("a.txt"), b"1").unwrap();

        let cancel = Arc::new(AtomicBool::new(true));
        let err = Scanner::scan_local(
            &root,
            ScanFilter::empty(),
            ScanOptions::default(),
            Some(cancel),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }

    #[test]
    fn missing_root_is_an_io_error() {
        let tmp = tempdir().unwrap();
        let root = utf8_root(&tmp).join("does-not-exist");
        let err = Scanner::scan_local(&root, ScanFilter::empty(), ScanOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, ScanError::Io { .. }));
    }

    #[test]
    fn mtimes_are_recorded_at_second_precision() {
        let tmp = tempdir().unwrap();
        let root = utf8_root(&tmp);
        let path = root.join("a.mkv");
        fs::write(&path, b"x").unwrap();
        filetime::set_file_mtime(
            path.as_std_path(),
            filetime::FileTime::from_unix_time(1_700_000_123, 456_000_000),
        )
        .unwrap();

        let manifest =
            Scanner::scan_local(&root, ScanFilter::empty(), ScanOptions::default(), None).unwrap();
        let info = manifest.get_file("a.mkv").unwrap();
        assert_eq!(info.mod_time.timestamp(), 1_700_000_123);
        assert_eq!(info.mod_time.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn hashing_is_opt_in() {
        let tmp = tempdir().unwrap();
        let root = utf8_root(&tmp);
        fs::write(root.join("a.bin"), b"hello").unwrap();

        let plain =
            Scanner::scan_local(&root, ScanFilter::empty(), ScanOptions::default(), None).unwrap();
        assert!(plain.get_file("a.bin").unwrap().hash.is_empty());

        let opts = ScanOptions {
            hash_files: true,
            ..ScanOptions::default()
        };
        let hashed = Scanner::scan_local(&root, ScanFilter::empty(), opts, None).unwrap();
        assert_eq!(
            hashed.get_file("a.bin").unwrap().hash,
            "5d41402abc4b2a76b9719d911017c592"
        );
    }
}
