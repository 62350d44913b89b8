use thiserror::Error;

/// Errors surfaced by the synchronization engine.
///
/// Staleness is intentionally absent: a stale push is an expected condition
/// that is discarded inside the progression state machine, not an error.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport disconnected")]
    TransportDisconnected,

    #[error("request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("operation requires the {required} role")]
    NotAuthorizedRole { required: &'static str },

    #[error("local state diverged from the server snapshot")]
    SnapshotDivergence,

    #[error("session lost after exhausting reconnect attempts")]
    SessionLost,

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    pub fn request_failed(reason: impl Into<String>) -> Self {
        SyncError::RequestFailed {
            reason: reason.into(),
        }
    }
}
