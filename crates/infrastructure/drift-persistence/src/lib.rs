use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod state;
pub mod store;

pub use cache::ReceiverCacheStore;
pub use state::{
    clear_approval_state, clear_engine_queue, load_approval_state, load_engine_queue,
    save_approval_state, save_engine_queue, ApprovalState,
};
pub use store::{FileSettingsStore, MemorySettingsStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store encoding error: {0}")]
    Encoding(String),
}

/// One row of the engine's activity log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncEventRecord {
    pub timestamp: DateTime<Utc>,
    pub engine_id: u32,
    pub action: String,
    pub path: String,
    pub size: i64,
}

/// Key-value + append-only-log collaborator the engine persists through.
/// Writes are best-effort from the engine's point of view: failures are
/// logged, never fatal to a cycle.
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn log_event(&self, event: &SyncEventRecord) -> Result<(), StoreError>;
    fn add_traffic(&self, bytes: u64) -> Result<(), StoreError>;
}
