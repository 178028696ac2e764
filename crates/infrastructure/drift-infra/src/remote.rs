use std::time::Duration;

use drift_core::api::{HealthResponse, StatResponse};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::debug;

use crate::TransferError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of the receiver HTTP API.
#[derive(Clone)]
pub struct ReceiverClient {
    client: reqwest::Client,
    dest_host: Option<String>,
    port: u16,
}

impl ReceiverClient {
    pub fn new(client: reqwest::Client, dest_host: Option<String>) -> Self {
        Self {
            client,
            dest_host,
            port: 8080,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn dest_host(&self) -> Option<&str> {
        self.dest_host.as_deref()
    }

    /// `POST /api/delete?path=..&dir=..`; any 2xx counts as done.
    pub async fn delete(&self, host: &str, path: &str, dir: bool) -> Result<(), TransferError> {
        let url = format!(
            "http://{host}:{port}/api/delete?path={path}&dir={dir}",
            port = self.port,
            path = utf8_percent_encode(path, NON_ALPHANUMERIC),
        );
        debug!(url = %url, "remote delete");
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| TransferError::RemoteApi(format!("delete request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(TransferError::RemoteApi(format!(
                "delete of {path} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// `GET /api/stat?path=..`: size probe used to resume interrupted
    /// transfers and to answer dashboard queries.
    pub async fn stat(&self, host: &str, path: &str) -> Result<StatResponse, TransferError> {
        let url = format!(
            "http://{host}:{port}/api/stat?path={path}",
            port = self.port,
            path = utf8_percent_encode(path, NON_ALPHANUMERIC),
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransferError::RemoteApi(format!("stat request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(TransferError::RemoteApi(format!(
                "stat of {path} returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| TransferError::RemoteApi(format!("stat parse failed: {e}")))
    }

    /// `POST /api/notify?path=..`: tells the receiver its manifest cache
    /// is stale. Best-effort.
    pub async fn notify_changed(&self, host: &str, path: &str) -> Result<(), TransferError> {
        let url = format!(
            "http://{host}:{port}/api/notify?path={path}",
            port = self.port,
            path = utf8_percent_encode(path, NON_ALPHANUMERIC),
        );
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| TransferError::RemoteApi(format!("notify request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(TransferError::RemoteApi(format!(
                "notify returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn health(&self, host: &str) -> Result<HealthResponse, TransferError> {
        let url = format!("http://{host}:{port}/health", port = self.port);
        let resp = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| TransferError::RemoteApi(format!("health request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(TransferError::RemoteApi(format!(
                "health returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| TransferError::RemoteApi(format!("health parse failed: {e}")))
    }
}
