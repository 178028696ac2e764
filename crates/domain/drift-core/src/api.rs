//! Wire types of the receiver HTTP API.

use serde::{Deserialize, Serialize};

/// `GET /api/stat` response. When the file itself is missing but an rsync
/// partial exists, `exists` stays false and `size` reports the largest
/// partial so the sender can account for resumable bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatResponse {
    pub size: i64,
    pub exists: bool,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime: u64,
}
