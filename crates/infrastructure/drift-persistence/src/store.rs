use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::{SettingsStore, StoreError, SyncEventRecord};

/// JSON-file settings store: one `settings.json` document plus an
/// append-only `events.log` (one JSON record per line). Writes go through
/// a temp file and an atomic rename.
pub struct FileSettingsStore {
    dir: Utf8PathBuf,
    settings: RwLock<HashMap<String, String>>,
}

impl FileSettingsStore {
    pub fn open(dir: impl AsRef<Utf8Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.to_string(),
            source,
        })?;

        let path = dir.join("settings.json");
        let settings = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(map) => map,
                Err(e) => {
                    // A corrupt settings file heals to empty rather than
                    // wedging startup.
                    warn!(path = %path, error = %e, "discarding unreadable settings file");
                    let _ = fs::remove_file(&path);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            dir,
            settings: RwLock::new(settings),
        })
    }

    fn flush(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        let path = self.dir.join("settings.json");
        let tmp = self.dir.join("settings.json.tmp");
        let data = serde_json::to_string_pretty(map)
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        fs::write(&tmp, data).map_err(|source| StoreError::Io {
            path: tmp.to_string(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.to_string(),
            source,
        })
    }
}

impl SettingsStore for FileSettingsStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.settings.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), value.to_string());
        self.flush(&map)
    }

    fn log_event(&self, event: &SyncEventRecord) -> Result<(), StoreError> {
        let path = self.dir.join("events.log");
        let line =
            serde_json::to_string(event).map_err(|e| StoreError::Encoding(e.to_string()))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.to_string(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| StoreError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn add_traffic(&self, bytes: u64) -> Result<(), StoreError> {
        let mut map = self.settings.write().unwrap_or_else(|e| e.into_inner());
        let total = map
            .get("traffic_total")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            .saturating_add(bytes);
        map.insert("traffic_total".to_string(), total.to_string());
        self.flush(&map)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Mutex<HashMap<String, String>>,
    events: Mutex<Vec<SyncEventRecord>>,
    traffic: AtomicU64,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEventRecord> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn traffic(&self) -> u64 {
        self.traffic.load(Ordering::Relaxed)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn log_event(&self, event: &SyncEventRecord) -> Result<(), StoreError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }

    fn add_traffic(&self, bytes: u64) -> Result<(), StoreError> {
        self.traffic.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }
}
