use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod api;
pub mod diff;
pub mod manifest;
pub mod path_utils;
pub mod target;

pub use manifest::Manifest;

/// Metadata snapshot of a single file or directory, relative to a sync root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

impl FileInfo {
    pub fn file(path: impl Into<String>, size: i64, mod_time: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            mod_time,
            is_dir: false,
            hash: String::new(),
        }
    }

    pub fn dir(path: impl Into<String>, mod_time: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            mod_time,
            is_dir: true,
            hash: String::new(),
        }
    }

    /// Called on the sender entry. True when the receiver copy is stale:
    /// type changed, size differs, or the sender mtime (whole seconds) is
    /// strictly newer.
    pub fn needs_update(&self, receiver: &FileInfo) -> bool {
        if self.is_dir != receiver.is_dir {
            return true;
        }
        if self.is_dir {
            return false;
        }
        if self.size != receiver.size {
            return true;
        }
        self.mod_time.timestamp() > receiver.mod_time.timestamp()
    }
}

/// Sync profile governing deletion policy. `Flat` never deletes directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRule {
    Flat,
    Series,
    #[default]
    Standard,
}

impl SyncRule {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Some(Self::Flat),
            "series" => Some(Self::Series),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Series => "series",
            Self::Standard => "standard",
        }
    }
}

/// A path present on both sides with differing size or a newer sender mtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetail {
    pub path: String,
    pub source_size: i64,
    pub source_time: DateTime<Utc>,
    pub receiver_size: i64,
    pub receiver_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenameAction {
    pub old_path: String,
    pub new_path: String,
}

/// Structured diff between two manifests. Execution order is:
/// dirs_to_create, renames, files_to_sync, files_to_delete, then
/// dirs_to_delete in reverse (leaves drain first).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPlan {
    pub files_to_sync: Vec<FileInfo>,
    pub files_to_delete: Vec<String>,
    pub dirs_to_create: Vec<String>,
    pub dirs_to_delete: Vec<String>,
    pub renames: Vec<RenameAction>,
    pub conflicts: Vec<ConflictDetail>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.files_to_sync.is_empty()
            && self.files_to_delete.is_empty()
            && self.dirs_to_create.is_empty()
            && self.dirs_to_delete.is_empty()
            && self.renames.is_empty()
    }

    /// Number of operations the executor would perform.
    pub fn change_count(&self) -> usize {
        self.files_to_sync.len()
            + self.files_to_delete.len()
            + self.dirs_to_create.len()
            + self.dirs_to_delete.len()
            + self.renames.len()
    }

    pub fn has_deletions(&self) -> bool {
        !self.files_to_delete.is_empty() || !self.dirs_to_delete.is_empty()
    }

    pub fn total_sync_bytes(&self) -> i64 {
        self.files_to_sync.iter().map(|f| f.size).sum()
    }
}
