pub mod pools;
pub mod remote;
pub mod rsync;
pub mod transfer;

pub use pools::SyncPools;
pub use remote::ReceiverClient;
pub use transfer::{Transferer, TransferHooks};

/// Per-file transfer failure taxonomy. `Paused` is a cooperative-cancel
/// sentinel: it is never retried and never recorded as a failure.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rename {from} -> {to}: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rsync exited with status {code}")]
    RemoteRsync { code: i32 },
    #[error("interrupted by pause")]
    Paused,
    #[error("rename across devices is not atomic")]
    CrossDevice,
    #[error("receiver API error: {0}")]
    RemoteApi(String),
    #[error("transfer pool closed")]
    PoolClosed,
}

impl TransferError {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}
