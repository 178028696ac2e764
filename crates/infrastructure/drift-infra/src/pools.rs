use std::sync::Arc;

use tokio::sync::Semaphore;

/// Process-wide resource pools shared by every engine. The scan pool keeps
/// multiple engines from walking full trees at once; the transfer pool
/// bounds active file copies. Both default to a single slot.
///
/// Constructed once at startup and passed to engines and scanners by
/// handle; there are no hidden globals.
#[derive(Debug)]
pub struct SyncPools {
    pub scan: Arc<Semaphore>,
    pub transfer: Arc<Semaphore>,
}

impl SyncPools {
    pub fn new(scan_slots: usize, transfer_slots: usize) -> Arc<Self> {
        Arc::new(Self {
            scan: Arc::new(Semaphore::new(scan_slots.max(1))),
            transfer: Arc::new(Semaphore::new(transfer_slots.max(1))),
        })
    }

    /// The production default: one scan, one transfer at a time.
    pub fn single() -> Arc<Self> {
        Self::new(1, 1)
    }
}
