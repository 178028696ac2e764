use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Ring of one-second throughput samples; sixty slots give dashboards a
/// minute of history.
#[derive(Debug)]
pub struct SpeedRing {
    samples: VecDeque<u64>,
    bytes_since_tick: u64,
    last_tick: Instant,
}

pub const SPEED_RING_CAPACITY: usize = 60;

impl SpeedRing {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SPEED_RING_CAPACITY),
            bytes_since_tick: 0,
            last_tick: Instant::now(),
        }
    }

    /// Record transferred bytes; publishes a sample once per second.
    pub fn record(&mut self, bytes: u64) {
        self.bytes_since_tick += bytes;
        self.maybe_tick();
    }

    fn maybe_tick(&mut self) {
        let elapsed = self.last_tick.elapsed();
        if elapsed.as_secs_f64() >= 1.0 {
            let rate = (self.bytes_since_tick as f64 / elapsed.as_secs_f64()) as u64;
            if self.samples.len() == SPEED_RING_CAPACITY {
                self.samples.pop_front();
            }
            self.samples.push_back(rate);
            self.bytes_since_tick = 0;
            self.last_tick = Instant::now();
        }
    }

    /// Most recent one-second sample.
    pub fn current(&self) -> u64 {
        self.samples.back().copied().unwrap_or(0)
    }

    pub fn average(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.samples.iter().sum::<u64>() / self.samples.len() as u64
    }
}

impl Default for SpeedRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Live transfer state for the file currently on the wire.
#[derive(Debug, Default)]
pub struct TransferProgress {
    pub current_file: String,
    pub current_progress: u64,
    pub total_file_size: u64,
    pub file_start_time: Option<Instant>,
    pub speed: SpeedRing,
}

impl TransferProgress {
    pub fn begin_file(&mut self, path: &str, size: u64) {
        self.current_file = path.to_string();
        self.current_progress = 0;
        self.total_file_size = size;
        self.file_start_time = Some(Instant::now());
    }

    /// Cumulative byte counts arrive from the transfer layer; the delta
    /// feeds the speed ring.
    pub fn update(&mut self, cumulative: u64) {
        let delta = cumulative.saturating_sub(self.current_progress);
        self.current_progress = cumulative;
        self.speed.record(delta);
    }

    pub fn end_file(&mut self) {
        self.current_file.clear();
        self.current_progress = 0;
        self.total_file_size = 0;
        self.file_start_time = None;
    }
}

/// Where the engine's cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Scanning,
    Comparing,
    WaitingApproval,
    Executing,
    Failed,
}

impl Default for CycleState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Dashboard-facing snapshot of one engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub engine_id: u32,
    pub alias: String,
    pub state: CycleState,
    pub paused: bool,
    pub current_file: String,
    pub current_progress: u64,
    pub total_file_size: u64,
    pub current_speed: u64,
    pub avg_speed: u64,
    pub plan_remaining_bytes: i64,
    pub waiting_for_approval: bool,
    pub pending_deletions: Vec<String>,
    pub failed_files: usize,
    pub success_count: u64,
    pub error_count: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let mut ring = SpeedRing::new();
        for _ in 0..200 {
            ring.samples.push_back(1);
            if ring.samples.len() > SPEED_RING_CAPACITY {
                ring.samples.pop_front();
            }
        }
        assert_eq!(ring.samples.len(), SPEED_RING_CAPACITY);
        assert_eq!(ring.average(), 1);
    }

    #[test]
    fn progress_tracks_cumulative_updates() {
        let mut p = TransferProgress::default();
        p.begin_file("a.mkv", 100);
        p.update(40);
        p.update(90);
        assert_eq!(p.current_progress, 90);
        assert_eq!(p.total_file_size, 100);
        p.end_file();
        assert!(p.current_file.is_empty());
    }
}
