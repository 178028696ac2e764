//! Ambient process configuration, read from the environment:
//!
//! - `SYNC_<N>_SOURCE` / `SYNC_<N>_TARGET` / `SYNC_<N>_RULE` /
//!   `SYNC_<N>_AUTO_APPROVE` for N in 1..=10 define engine pairs
//! - `MODE` selects `sender` (default) or `receiver`
//! - `DEST_HOST`, `DEST_MODULE` name the default receiver identity
//! - `BWLIMIT_MBPS` caps transfer speed (× 125 000 = bytes/s)
//! - `POLL_INTERVAL` (seconds) enables the source-poll loop
//! - `WATCH_INTERVAL_HOURS` overrides the periodic full-sync cadence
//! - `CONFIG_DIR` overrides the state directory
//! - `RSYNC_PASSWORD` is passed through to the rsync subprocess

use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use drift_core::SyncRule;

/// Engine pairs are numbered 1..=10.
pub const MAX_ENGINES: u32 = 10;

/// `BWLIMIT_MBPS` unit conversion factor.
pub const BWLIMIT_UNIT: u64 = 125_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SYNC_{0}_TARGET is set but SYNC_{0}_SOURCE is missing (or vice versa)")]
    HalfPair(u32),
    #[error("SYNC_{0}_RULE is '{1}', expected flat, series or standard")]
    InvalidRule(u32, String),
    #[error("{0} is '{1}', expected an integer")]
    InvalidNumber(&'static str, String),
    #[error("MODE is '{0}', expected sender or receiver")]
    InvalidMode(String),
    #[error("no config directory: set CONFIG_DIR")]
    NoConfigDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Sender,
    Receiver,
}

#[derive(Debug, Clone)]
pub struct EnginePair {
    pub id: u32,
    pub source: String,
    pub target: String,
    pub rule: SyncRule,
    pub auto_approve: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub mode: Mode,
    pub dest_host: Option<String>,
    pub dest_module: Option<String>,
    /// Bytes per second; 0 means unlimited.
    pub bandwidth_limit: u64,
    pub poll_interval: Duration,
    /// Periodic full-sync override; None keeps the engine default.
    pub watch_interval: Option<Duration>,
    pub config_dir: Utf8PathBuf,
    pub rsync_password: Option<String>,
    pub engines: Vec<EnginePair>,
}

pub fn load_from_env() -> Result<ProcessConfig, ConfigError> {
    load_with(|key| std::env::var(key).ok())
}

/// Same contract as `load_from_env`, with the lookup injected so tests do
/// not mutate process-global state.
pub fn load_with(get: impl Fn(&str) -> Option<String>) -> Result<ProcessConfig, ConfigError> {
    let mode = match get("MODE").as_deref().map(str::trim) {
        None | Some("") | Some("sender") => Mode::Sender,
        Some("receiver") => Mode::Receiver,
        Some(other) => return Err(ConfigError::InvalidMode(other.to_string())),
    };

    let bandwidth_limit = match get("BWLIMIT_MBPS") {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(|mbps| mbps * BWLIMIT_UNIT)
            .map_err(|_| ConfigError::InvalidNumber("BWLIMIT_MBPS", raw))?,
        _ => 0,
    };

    let poll_interval = match get("POLL_INTERVAL") {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidNumber("POLL_INTERVAL", raw))?,
        _ => Duration::ZERO,
    };

    let watch_interval = match get("WATCH_INTERVAL_HOURS") {
        Some(raw) if !raw.trim().is_empty() => Some(
            raw.trim()
                .parse::<u64>()
                .map(|hours| Duration::from_secs(hours * 3600))
                .map_err(|_| ConfigError::InvalidNumber("WATCH_INTERVAL_HOURS", raw))?,
        ),
        _ => None,
    };

    let config_dir = match get("CONFIG_DIR") {
        Some(dir) if !dir.trim().is_empty() => Utf8PathBuf::from(dir.trim()),
        _ => ProjectDirs::from("com", "drift", "sync")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.config_dir().to_path_buf()).ok())
            .ok_or(ConfigError::NoConfigDir)?,
    };

    let mut engines = Vec::new();
    for id in 1..=MAX_ENGINES {
        let source = get(&format!("SYNC_{id}_SOURCE")).filter(|s| !s.trim().is_empty());
        let target = get(&format!("SYNC_{id}_TARGET")).filter(|s| !s.trim().is_empty());
        let (source, target) = match (source, target) {
            (Some(s), Some(t)) => (s.trim().to_string(), t.trim().to_string()),
            (None, None) => continue,
            _ => return Err(ConfigError::HalfPair(id)),
        };

        let rule = match get(&format!("SYNC_{id}_RULE")) {
            Some(raw) if !raw.trim().is_empty() => SyncRule::parse(&raw)
                .ok_or_else(|| ConfigError::InvalidRule(id, raw.trim().to_string()))?,
            _ => SyncRule::Standard,
        };
        let auto_approve = get(&format!("SYNC_{id}_AUTO_APPROVE"))
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "on" | "1"))
            .unwrap_or(false);

        engines.push(EnginePair {
            id,
            source,
            target,
            rule,
            auto_approve,
        });
    }

    Ok(ProcessConfig {
        mode,
        dest_host: get("DEST_HOST").filter(|s| !s.trim().is_empty()),
        dest_module: get("DEST_MODULE").filter(|s| !s.trim().is_empty()),
        bandwidth_limit,
        poll_interval,
        watch_interval,
        config_dir,
        rsync_password: get("RSYNC_PASSWORD").filter(|s| !s.is_empty()),
        engines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn loads_engine_pairs_in_order() {
        let get = env(&[
            ("CONFIG_DIR", "/tmp/drift"),
            ("SYNC_1_SOURCE", "/data/shows"),
            ("SYNC_1_TARGET", "backup@nas::media/shows"),
            ("SYNC_1_RULE", "series"),
            ("SYNC_1_AUTO_APPROVE", "true"),
            ("SYNC_3_SOURCE", "/data/movies"),
            ("SYNC_3_TARGET", "/mnt/mirror/movies"),
        ]);
        let config = load_with(get).unwrap();

        assert_eq!(config.engines.len(), 2);
        assert_eq!(config.engines[0].id, 1);
        assert_eq!(config.engines[0].rule, SyncRule::Series);
        assert!(config.engines[0].auto_approve);
        assert_eq!(config.engines[1].id, 3);
        assert_eq!(config.engines[1].rule, SyncRule::Standard);
        assert!(!config.engines[1].auto_approve);
    }

    #[test]
    fn half_pairs_are_rejected() {
        let get = env(&[("CONFIG_DIR", "/tmp/d"), ("SYNC_2_SOURCE", "/data")]);
        assert!(matches!(load_with(get), Err(ConfigError::HalfPair(2))));
    }

    #[test]
    fn bwlimit_converts_to_bytes_per_second() {
        let get = env(&[("CONFIG_DIR", "/tmp/d"), ("BWLIMIT_MBPS", "8")]);
        let config = load_with(get).unwrap();
        assert_eq!(config.bandwidth_limit, 1_000_000);
    }

    #[test]
    fn mode_and_poll_interval_parse() {
        let get = env(&[
            ("CONFIG_DIR", "/tmp/d"),
            ("MODE", "receiver"),
            ("POLL_INTERVAL", "300"),
            ("WATCH_INTERVAL_HOURS", "6"),
        ]);
        let config = load_with(get).unwrap();
        assert_eq!(config.mode, Mode::Receiver);
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.watch_interval, Some(Duration::from_secs(6 * 3600)));

        let bad = env(&[("CONFIG_DIR", "/tmp/d"), ("MODE", "proxy")]);
        assert!(matches!(load_with(bad), Err(ConfigError::InvalidMode(_))));
    }

    #[test]
    fn bad_rule_is_an_error() {
        let get = env(&[
            ("CONFIG_DIR", "/tmp/d"),
            ("SYNC_1_SOURCE", "/a"),
            ("SYNC_1_TARGET", "/b"),
            ("SYNC_1_RULE", "mirror"),
        ]);
        assert!(matches!(load_with(get), Err(ConfigError::InvalidRule(1, _))));
    }
}
