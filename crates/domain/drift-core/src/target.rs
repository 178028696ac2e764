//! Rsync-style target URI grammar:
//! `user@host::module[/subpath]` and `rsync://[user@]host[:port]/module[/subpath]`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUri {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub module: String,
    pub subpath: String,
}

pub fn is_remote_target(s: &str) -> bool {
    s.contains("::") || s.starts_with("rsync://")
}

pub fn parse_target(s: &str) -> Option<TargetUri> {
    if let Some(rest) = s.strip_prefix("rsync://") {
        let (authority, path) = rest.split_once('/')?;
        let (user, hostport) = match authority.split_once('@') {
            Some((u, h)) => (Some(u.to_string()), h),
            None => (None, authority),
        };
        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                (h.to_string(), p.parse().ok())
            }
            _ => (hostport.to_string(), None),
        };
        let (module, subpath) = split_module(path);
        if host.is_empty() || module.is_empty() {
            return None;
        }
        Some(TargetUri {
            user,
            host,
            port,
            module,
            subpath,
        })
    } else if let Some((head, tail)) = s.split_once("::") {
        let (user, host) = match head.split_once('@') {
            Some((u, h)) => (Some(u.to_string()), h.to_string()),
            None => (None, head.to_string()),
        };
        let (module, subpath) = split_module(tail);
        if module.is_empty() {
            return None;
        }
        // Host may be empty here; callers fall back to the ambient DEST_HOST.
        Some(TargetUri {
            user,
            host,
            port: None,
            module,
            subpath,
        })
    } else {
        None
    }
}

fn split_module(path: &str) -> (String, String) {
    match path.split_once('/') {
        Some((module, subpath)) => (module.to_string(), subpath.trim_matches('/').to_string()),
        None => (path.to_string(), String::new()),
    }
}

/// Host a remote target points at, falling back to the ambient `DEST_HOST`.
pub fn host_of(target: &str, dest_host: Option<&str>) -> Option<String> {
    match parse_target(target) {
        Some(t) if !t.host.is_empty() => Some(t.host),
        _ => dest_host.filter(|h| !h.is_empty()).map(str::to_string),
    }
}

/// Normalize a target URI that points at the local identity into its local
/// data path `/data[/subpath]`. Returns None for foreign targets.
pub fn resolve_target_path(target: &str, dest_host: &str, dest_module: &str) -> Option<String> {
    let t = parse_target(target)?;
    let host = if t.host.is_empty() {
        dest_host.to_string()
    } else {
        t.host.clone()
    };
    if !host.eq_ignore_ascii_case(dest_host) || !t.module.eq_ignore_ascii_case(dest_module) {
        return None;
    }
    let mut path = String::from("/data");
    if !t.subpath.is_empty() {
        path.push('/');
        path.push_str(&t.subpath);
    }
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    Some(path)
}
