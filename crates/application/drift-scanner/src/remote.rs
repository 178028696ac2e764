use std::time::Duration;

use drift_core::target;
use drift_core::Manifest;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::debug;

use crate::ScanError;

/// Receiver manifest requests may walk a large tree on the far side.
const REMOTE_SCAN_TIMEOUT: Duration = Duration::from_secs(120);

/// Port the receiver API listens on.
pub const RECEIVER_API_PORT: u16 = 8080;

/// Fetch the receiver's manifest for an rsync-style target over its HTTP
/// API. The host comes from the target URI, falling back to `dest_host`.
pub async fn scan_remote(
    client: &reqwest::Client,
    target_uri: &str,
    dest_host: Option<&str>,
) -> Result<Manifest, ScanError> {
    scan_remote_at(client, target_uri, dest_host, RECEIVER_API_PORT).await
}

/// As `scan_remote`, with an explicit port (tests bind ephemeral ones).
pub async fn scan_remote_at(
    client: &reqwest::Client,
    target_uri: &str,
    dest_host: Option<&str>,
    port: u16,
) -> Result<Manifest, ScanError> {
    let host = target::host_of(target_uri, dest_host).ok_or_else(|| ScanError::Remote {
        url: target_uri.to_string(),
        detail: "no host in target and no DEST_HOST fallback".to_string(),
    })?;
    let subpath = target::parse_target(target_uri)
        .map(|t| t.subpath)
        .unwrap_or_default();

    let url = format!(
        "http://{host}:{port}/api/manifest?path={}",
        utf8_percent_encode(&subpath, NON_ALPHANUMERIC)
    );
    debug!(url = %url, "fetching remote manifest");

    let resp = client
        .get(&url)
        .timeout(REMOTE_SCAN_TIMEOUT)
        .send()
        .await
        .map_err(|e| ScanError::Remote {
            url: url.clone(),
            detail: e.to_string(),
        })?;

    if resp.status() != reqwest::StatusCode::OK {
        return Err(ScanError::Remote {
            url,
            detail: format!("unexpected status {}", resp.status()),
        });
    }

    resp.json::<Manifest>().await.map_err(|e| ScanError::Remote {
        url,
        detail: format!("manifest parse failed: {e}"),
    })
}
