//! The transport contract between two named endpoints.
//!
//! A transport delivers opaque frames to exactly one peer. Delivery is
//! at-least-once while connected; the channel may drop and a new transport
//! may later replace it. Nothing here pairs requests with responses; that is
//! done entirely by correlation ids one layer up.

use crate::message::WireMessage;
use async_trait::async_trait;
use ferry_types::error::FerryError;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Not connected to {0}")]
    NotConnected(String),
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
}

impl From<WireError> for FerryError {
    fn from(e: WireError) -> Self {
        FerryError::Transport(e.to_string())
    }
}

/// Inbound frame stream handed to whoever owns a transport.
pub type Inbound = mpsc::UnboundedReceiver<WireMessage>;

/// Asynchronous, bidirectional delivery to one named peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Name of the endpoint on the far side.
    fn peer_name(&self) -> &str;

    /// Deliver a frame to the peer.
    async fn send(&self, msg: WireMessage) -> Result<(), WireError>;

    /// Take the inbound frame stream. Returns `None` once it has been taken.
    ///
    /// The stream ends when the peer goes away.
    fn take_inbound(&self) -> Option<Inbound>;

    /// Whether the channel is currently usable.
    fn is_connected(&self) -> bool;
}
