use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote rejected the request with status {status}")]
    Rejected { status: u16 },

    #[error("invalid action id '{0}': must be non-empty")]
    InvalidActionId(String),

    #[error("no tokio runtime: build inside a runtime or pass a handle")]
    NoRuntime,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// True for failures of a remote round trip (transport, timeout, status).
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Rejected { .. }
        )
    }

    /// The remote refused the payload itself (400). Resending it cannot
    /// succeed, so the caller drops it instead of retrying.
    pub fn is_final_rejection(&self) -> bool {
        matches!(self, Self::Rejected { status: 400 })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
