//! In-process transport pair.

use crate::message::WireMessage;
use crate::transport::{Inbound, Transport, WireError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Both directions of a pair. Dropping the senders ends both inbound streams.
struct PairLink {
    a_to_b: Mutex<Option<mpsc::UnboundedSender<WireMessage>>>,
    b_to_a: Mutex<Option<mpsc::UnboundedSender<WireMessage>>>,
    connected: AtomicBool,
}

impl PairLink {
    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.a_to_b.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.b_to_a.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[derive(Clone, Copy)]
enum Side {
    A,
    B,
}

/// One endpoint of an in-process transport pair.
///
/// Frames are delivered in send order. Either side may [`disconnect`] the
/// pair, which ends the inbound stream on both sides.
///
/// [`disconnect`]: MemoryTransport::disconnect
pub struct MemoryTransport {
    peer: String,
    side: Side,
    link: Arc<PairLink>,
    inbound: Mutex<Option<Inbound>>,
}

impl MemoryTransport {
    /// Create two connected endpoints. The first is named `a` as seen from
    /// the second, and vice versa.
    pub fn pair(a: &str, b: &str) -> (MemoryTransport, MemoryTransport) {
        let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
        let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
        let link = Arc::new(PairLink {
            a_to_b: Mutex::new(Some(a_to_b_tx)),
            b_to_a: Mutex::new(Some(b_to_a_tx)),
            connected: AtomicBool::new(true),
        });

        let side_a = MemoryTransport {
            peer: b.to_string(),
            side: Side::A,
            link: Arc::clone(&link),
            inbound: Mutex::new(Some(b_to_a_rx)),
        };
        let side_b = MemoryTransport {
            peer: a.to_string(),
            side: Side::B,
            link,
            inbound: Mutex::new(Some(a_to_b_rx)),
        };
        (side_a, side_b)
    }

    /// Close both directions of the pair.
    pub fn disconnect(&self) {
        debug!(peer = %self.peer, "Memory transport disconnected");
        self.link.close();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn peer_name(&self) -> &str {
        &self.peer
    }

    async fn send(&self, msg: WireMessage) -> Result<(), WireError> {
        let outbound = match self.side {
            Side::A => &self.link.a_to_b,
            Side::B => &self.link.b_to_a,
        };
        let guard = outbound.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| WireError::NotConnected(self.peer.clone())),
            None => Err(WireError::NotConnected(self.peer.clone())),
        }
    }

    fn take_inbound(&self) -> Option<Inbound> {
        self.inbound.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        // Either endpoint going away tears the pair down, like a closed port.
        self.link.close();
    }
}
