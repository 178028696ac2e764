//! Receiver-mode HTTP API. A sender's scanner and transferer consume these
//! endpoints; anything else (dashboards, probes) gets the same contract:
//!
//! - `GET  /api/manifest?path=`: manifest of the data root (or a subtree)
//! - `GET  /api/stat?path=`: size/existence probe, rsync-partial aware
//! - `POST /api/delete?path=&dir=`: remove one file or directory
//! - `POST /api/notify?path=`: manifest cache invalidation
//! - `GET  /health`: liveness

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use camino::{Utf8Path, Utf8PathBuf};
use drift_core::api::{HealthResponse, StatResponse};
use drift_core::path_utils::DriftPath;
use drift_core::Manifest;
use drift_infra::SyncPools;
use drift_scanner::{ScanFilter, ScanOptions, Scanner};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Manifest responses are cached per resolved path for this long; a
/// `/api/notify` drops the whole cache.
const MANIFEST_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct ReceiverState {
    data_root: Utf8PathBuf,
    pools: Arc<SyncPools>,
    manifest_cache: Mutex<HashMap<String, (Instant, Arc<Manifest>)>>,
    started_at: Instant,
}

impl ReceiverState {
    pub fn new(data_root: impl Into<Utf8PathBuf>, pools: Arc<SyncPools>) -> Arc<Self> {
        Arc::new(Self {
            data_root: data_root.into(),
            pools,
            manifest_cache: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        })
    }

    fn cache_get(&self, key: &str) -> Option<Arc<Manifest>> {
        let cache = self.manifest_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < MANIFEST_CACHE_TTL)
            .map(|(_, m)| m.clone())
    }

    fn cache_put(&self, key: String, manifest: Arc<Manifest>) {
        self.manifest_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, (Instant::now(), manifest));
    }

    fn cache_clear(&self) {
        self.manifest_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Map a requested subpath onto the data root. A miss drops the first
    /// path component (sender module prefixes differ across configs) and
    /// finally falls back to the root itself.
    fn resolve_scan_root(&self, rel: &str) -> Utf8PathBuf {
        let rel = DriftPath::normalize(rel);
        if !rel.is_empty() && DriftPath::verify_safe(&rel) {
            let joined = self.data_root.join(&rel);
            if joined.exists() {
                return joined;
            }
            if let Some((_, rest)) = rel.split_once('/') {
                let retry = self.data_root.join(rest);
                if retry.exists() {
                    return retry;
                }
            }
        }
        self.data_root.clone()
    }
}

pub fn router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/api/manifest", get(get_manifest))
        .route("/api/stat", get(get_stat))
        .route("/api/delete", post(post_delete))
        .route("/api/notify", post(post_notify))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Bind and serve until the task is dropped.
pub async fn serve(
    state: Arc<ReceiverState>,
    listener: tokio::net::TcpListener,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, root = %state.data_root, "receiver API listening");
    axum::serve(listener, router(state)).await
}

#[derive(Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct DeleteQuery {
    path: String,
    #[serde(default)]
    dir: bool,
}

async fn get_manifest(
    State(state): State<Arc<ReceiverState>>,
    Query(q): Query<PathQuery>,
) -> Response {
    let scan_root = state.resolve_scan_root(&q.path);
    let key = scan_root.to_string();

    if let Some(cached) = state.cache_get(&key) {
        debug!(path = %key, "manifest served from cache");
        return Json(&*cached).into_response();
    }

    let permit = match state.pools.scan.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };
    let root = scan_root.clone();
    let scanned = tokio::task::spawn_blocking(move || {
        Scanner::scan_local(&root, ScanFilter::empty(), ScanOptions::default(), None)
    })
    .await;
    drop(permit);

    match scanned {
        Ok(Ok(manifest)) => {
            let manifest = Arc::new(manifest);
            state.cache_put(key, manifest.clone());
            Json(&*manifest).into_response()
        }
        Ok(Err(e)) => {
            warn!(path = %scan_root, error = %e, "manifest scan failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_stat(
    State(state): State<Arc<ReceiverState>>,
    Query(q): Query<PathQuery>,
) -> Response {
    let rel = DriftPath::normalize(&q.path);
    if !DriftPath::verify_safe(&rel) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let full = state.data_root.join(&rel);

    if let Ok(meta) = std::fs::metadata(&full) {
        return Json(StatResponse {
            size: meta.len() as i64,
            exists: true,
        })
        .into_response();
    }

    // The file is not there; an interrupted rsync may have left a partial
    // named `.<basename>.XXXXXX` beside it. Report the largest one so the
    // sender can account for resumable bytes.
    let size = largest_partial(&full).unwrap_or(0);
    Json(StatResponse {
        size,
        exists: false,
    })
    .into_response()
}

fn largest_partial(full: &Utf8Path) -> Option<i64> {
    let parent = full.parent()?;
    let base = full.file_name()?;
    let prefix = format!(".{base}.");
    let mut largest: Option<i64> = None;
    for entry in std::fs::read_dir(parent).ok()?.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            let size = meta.len() as i64;
            if largest.map_or(true, |cur| size > cur) {
                largest = Some(size);
            }
        }
    }
    largest
}

async fn post_delete(
    State(state): State<Arc<ReceiverState>>,
    Query(q): Query<DeleteQuery>,
) -> StatusCode {
    let rel = DriftPath::normalize(&q.path);
    if rel.is_empty() || !DriftPath::verify_safe(&rel) {
        return StatusCode::BAD_REQUEST;
    }
    let full = state.data_root.join(&rel);

    let result = if q.dir {
        std::fs::remove_dir_all(&full)
    } else {
        std::fs::remove_file(&full)
    };
    match result {
        Ok(()) => {
            info!(path = %rel, dir = q.dir, "deleted by sender request");
            state.cache_clear();
            StatusCode::NO_CONTENT
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NO_CONTENT,
        Err(e) => {
            warn!(path = %rel, error = %e, "delete failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn post_notify(
    State(state): State<Arc<ReceiverState>>,
    Query(q): Query<PathQuery>,
) -> StatusCode {
    debug!(path = %q.path, "manifest cache invalidated");
    state.cache_clear();
    StatusCode::NO_CONTENT
}

async fn get_health(State(state): State<Arc<ReceiverState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.started_at.elapsed().as_secs(),
    })
}
