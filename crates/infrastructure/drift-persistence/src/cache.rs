use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use drift_core::Manifest;
use tracing::warn;

use crate::StoreError;

/// On-disk mirror of an engine's in-memory receiver model, rewritten after
/// every successful cycle and reloaded on start so a restart does not force
/// a remote rescan.
pub struct ReceiverCacheStore {
    dir: Utf8PathBuf,
}

impl ReceiverCacheStore {
    pub fn new(dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
        }
    }

    fn path(&self, engine_id: u32) -> Utf8PathBuf {
        self.dir.join(format!("receiver_cache_{engine_id}.json"))
    }

    /// Corrupt cache files are removed and treated as absent.
    pub fn load(&self, engine_id: u32) -> Result<Option<Manifest>, StoreError> {
        let path = self.path(engine_id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_string(),
                    source,
                })
            }
        };
        match serde_json::from_str(&data) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!(path = %path, error = %e, "discarding unreadable receiver cache");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    pub fn save(&self, engine_id: u32, manifest: &Manifest) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.to_string(),
            source,
        })?;
        let path = self.path(engine_id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string(manifest)
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

    pub fn clear(&self, engine_id: u32) {
        let _ = fs::remove_file(self.path(engine_id));
    }
}
