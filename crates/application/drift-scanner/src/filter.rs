use globset::{Glob, GlobSet, GlobSetBuilder};

use drift_core::path_utils::DriftPath;

/// Exclude/include matching for scans. Exclude patterns are tested against
/// the full relative path, the basename, and every path component, so a
/// bare directory name like `.grab` prunes the whole subtree. Include
/// patterns apply to plain files only; an empty include list admits all.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    exclude: GlobSet,
    include: GlobSet,
    include_empty: bool,
}

impl ScanFilter {
    pub fn new(exclude: &[String], include: &[String]) -> Result<Self, globset::Error> {
        let mut ex = GlobSetBuilder::new();
        for pattern in exclude {
            ex.add(Glob::new(pattern)?);
        }
        let mut inc = GlobSetBuilder::new();
        for pattern in include {
            inc.add(Glob::new(pattern)?);
        }
        Ok(Self {
            exclude: ex.build()?,
            include: inc.build()?,
            include_empty: include.is_empty(),
        })
    }

    pub fn empty() -> Self {
        Self {
            exclude: GlobSet::empty(),
            include: GlobSet::empty(),
            include_empty: true,
        }
    }

    pub fn is_excluded(&self, rel_path: &str) -> bool {
        if self.exclude.is_match(rel_path) {
            return true;
        }
        if self.exclude.is_match(DriftPath::base_name(rel_path)) {
            return true;
        }
        rel_path
            .split('/')
            .any(|component| self.exclude.is_match(component))
    }

    /// Files only; directories are always descended unless excluded.
    pub fn is_included(&self, rel_path: &str) -> bool {
        if self.include_empty {
            return true;
        }
        self.include.is_match(rel_path) || self.include.is_match(DriftPath::base_name(rel_path))
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::empty()
    }
}
