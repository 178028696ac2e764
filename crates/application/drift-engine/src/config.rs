use std::time::Duration;

use camino::Utf8PathBuf;
use drift_core::SyncRule;

/// Default cadence of the periodic full sync.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);

/// Per-engine configuration. `bandwidth_limit`, `auto_approve_deletions`
/// and `alias` stay adjustable at runtime through the engine; everything
/// else is fixed at construction.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub id: u32,
    pub source_dir: Utf8PathBuf,
    /// Absolute local path or rsync-style remote URI.
    pub target_dir: String,
    pub rule: SyncRule,
    pub exclude_patterns: Vec<String>,
    pub include_patterns: Vec<String>,
    /// Bytes per second; 0 means unlimited.
    pub bandwidth_limit: u64,
    /// Periodic full-sync cadence; zero disables the loop.
    pub watch_interval: Duration,
    /// Source-poll cadence for mounts that drop fs events; zero disables.
    pub poll_interval: Duration,
    pub auto_approve_deletions: bool,
    pub alias: String,
}

impl SyncConfig {
    pub fn new(id: u32, source_dir: impl Into<Utf8PathBuf>, target_dir: impl Into<String>) -> Self {
        Self {
            id,
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
            rule: SyncRule::Standard,
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            bandwidth_limit: 0,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            poll_interval: Duration::ZERO,
            auto_approve_deletions: false,
            alias: String::new(),
        }
    }

    pub fn is_remote_target(&self) -> bool {
        drift_core::target::is_remote_target(&self.target_dir)
    }
}
