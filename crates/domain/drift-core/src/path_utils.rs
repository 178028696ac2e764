pub struct DriftPath;

impl DriftPath {
    /// Standardize directory separators to forward slashes and strip any
    /// trailing separator. This is the wire format for manifest keys.
    pub fn normalize(path: &str) -> String {
        let p = path.replace('\\', "/");
        p.trim_end_matches('/').to_string()
    }

    /// For comparisons (diffing, case-insensitive lookup), use a canonical
    /// lowercase key. This resolves "Addons" vs "addons" mismatch loops on
    /// case-insensitive receiver filesystems.
    pub fn canonicalize(path: &str) -> String {
        Self::normalize(path).to_lowercase()
    }

    /// Reject paths that could escape the sync root.
    pub fn verify_safe(rel_path: &str) -> bool {
        let p = std::path::Path::new(rel_path);
        !p.is_absolute()
            && !p
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }

    /// Parent of a root-relative path, or None for top-level entries.
    pub fn parent(path: &str) -> Option<&str> {
        path.rsplit_once('/').map(|(p, _)| p)
    }

    /// First component of a root-relative path. For a top-level entry this
    /// is the entry itself.
    pub fn top_component(path: &str) -> &str {
        path.split_once('/').map(|(t, _)| t).unwrap_or(path)
    }

    pub fn base_name(path: &str) -> &str {
        path.rsplit_once('/').map(|(_, b)| b).unwrap_or(path)
    }
}
