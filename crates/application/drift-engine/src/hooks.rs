use chrono::{DateTime, Utc};

/// One executed (or dry-run) operation, as fanned out to dashboards.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub timestamp: DateTime<Utc>,
    pub engine_id: u32,
    pub action: String,
    pub path: String,
    pub size: i64,
}

/// Behavior-injection surface of an engine. Implementations must not block:
/// the engine calls these from the sync path and will not wait for slow
/// consumers.
pub trait EngineHooks: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
    fn on_error(&self, path: &str, message: &str);
    /// Forces dry-run regardless of the stored sync mode.
    fn is_dry_run(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Opaque notification sink (chat webhooks and the like live behind it).
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

pub struct NoopHooks;

impl EngineHooks for NoopHooks {
    fn on_event(&self, _event: &SyncEvent) {}
    fn on_error(&self, _path: &str, _message: &str) {}
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: &str, _severity: Severity) {}
}
