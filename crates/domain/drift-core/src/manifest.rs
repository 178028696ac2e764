use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::path_utils::DriftPath;
use crate::FileInfo;

#[derive(Debug, Default)]
struct LowerIndex {
    files: HashMap<String, String>,
    dirs: HashMap<String, String>,
}

/// Snapshot of a rooted file tree: path-keyed entries plus the set of
/// directory paths. Paths are case preserving; a lazily built lowercase
/// index backs case-insensitive lookup and is dropped on any `add`.
///
/// Once a manifest is published to an engine it is treated as a value:
/// producers hand out fresh instances instead of mutating shared ones.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub root: String,
    pub files: HashMap<String, FileInfo>,
    pub dirs: BTreeSet<String>,
    #[serde(skip)]
    lower: RwLock<Option<LowerIndex>>,
}

impl Manifest {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            files: HashMap::new(),
            dirs: BTreeSet::new(),
            lower: RwLock::new(None),
        }
    }

    /// Insert an entry, keeping the directory set consistent. Directory
    /// entries are forced to `size = 0` and an empty hash.
    pub fn add(&mut self, mut info: FileInfo) {
        info.path = DriftPath::normalize(&info.path);
        if info.is_dir {
            info.size = 0;
            info.hash.clear();
            self.dirs.insert(info.path.clone());
        }
        self.files.insert(info.path.clone(), info);
        *self.lower.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.get_file(path).is_some()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.get_dir(path).is_some()
    }

    /// Exact lookup first, then case-insensitive through the lazy index.
    /// A directory entry at `path` is a miss; `get_dir` answers those.
    pub fn get_file(&self, path: &str) -> Option<&FileInfo> {
        if let Some(info) = self.files.get(path) {
            if !info.is_dir {
                return Some(info);
            }
        }
        let key = self.lookup_lower(path, false)?;
        self.files.get(&key)
    }

    pub fn get_dir(&self, path: &str) -> Option<&FileInfo> {
        if self.dirs.contains(path) {
            return self.files.get(path);
        }
        let key = self.lookup_lower(path, true)?;
        self.files.get(&key)
    }

    /// Remove a single entry. Directory entries leave their descendants in
    /// place; use `remove_subtree` to drop those too.
    pub fn remove(&mut self, path: &str) -> Option<FileInfo> {
        let removed = self.files.remove(path);
        self.dirs.remove(path);
        *self.lower.write().unwrap_or_else(|e| e.into_inner()) = None;
        removed
    }

    /// Remove a directory entry together with everything beneath it.
    pub fn remove_subtree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.files
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        self.dirs.retain(|key| key != path && !key.starts_with(&prefix));
        *self.lower.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Number of plain files directly inside `dir` (not recursive).
    pub fn file_count_in_dir(&self, dir: &str) -> usize {
        let want = DriftPath::canonicalize(dir);
        self.files
            .values()
            .filter(|f| !f.is_dir)
            .filter(|f| {
                DriftPath::parent(&f.path)
                    .map(DriftPath::canonicalize)
                    .unwrap_or_default()
                    == want
            })
            .count()
    }

    pub fn file_count(&self) -> usize {
        self.files.values().filter(|f| !f.is_dir).count()
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    fn lookup_lower(&self, path: &str, dir: bool) -> Option<String> {
        let canonical = DriftPath::canonicalize(path);
        {
            let guard = self.lower.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ref index) = *guard {
                let map = if dir { &index.dirs } else { &index.files };
                return map.get(&canonical).cloned();
            }
        }
        let mut index = LowerIndex::default();
        for (key, info) in &self.files {
            let lower = DriftPath::canonicalize(key);
            if info.is_dir {
                index.dirs.insert(lower, key.clone());
            } else {
                index.files.insert(lower, key.clone());
            }
        }
        let map = if dir { &index.dirs } else { &index.files };
        let hit = map.get(&canonical).cloned();
        *self.lower.write().unwrap_or_else(|e| e.into_inner()) = Some(index);
        hit
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new("")
    }
}

impl Clone for Manifest {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            files: self.files.clone(),
            dirs: self.dirs.clone(),
            lower: RwLock::new(None),
        }
    }
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.files == other.files && self.dirs == other.dirs
    }
}
