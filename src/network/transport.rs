use crate::error::SyncError;
use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// A live duplex connection carrying newline-free text frames.
///
/// The connection is considered closed when `inbound` yields `None`;
/// dropping `outbound` (or the peer hanging up) ends the underlying
/// socket tasks.
pub struct TransportConnection {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<String>,
}

/// Seam between the channel manager and the concrete socket.
///
/// `connect` is called once per (re)connection attempt; the channel
/// manager owns the retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<TransportConnection, SyncError>;
}
