//! Event bridge: replicates locally raised events to the other side of the
//! boundary, exactly once.
//!
//! Every event carries a hop count. The bridge forwards only hop-0 events, as
//! hop 1, and events received from the other side are published locally with
//! their received hop count. A forwarded event therefore never crosses back,
//! however many contexts are listening.

use crate::bus::EventBus;
use crate::transport::WireError;
use async_trait::async_trait;
use ferry_types::broadcast::BroadcastMessage;
use ferry_types::event::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where the bridge sends forwarded events.
///
/// The remote context fans out to every attached client; a client sends to
/// its one remote.
#[async_trait]
pub trait BridgeOutlet: Send + Sync + 'static {
    async fn forward(&self, msg: BroadcastMessage) -> Result<(), WireError>;
}

/// Bridge traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Local events sent across the boundary.
    pub forwarded: u64,
    /// Events seen on the local bus but not forwarded (hop count above 0).
    pub refused: u64,
    /// Events received from the other side and published locally.
    pub received: u64,
}

/// One context's end of the event bridge.
pub struct EventBridge {
    bus: Arc<EventBus>,
    forwarded: AtomicU64,
    refused: AtomicU64,
    received: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBridge {
    /// Start bridging `bus` to `outlet`.
    ///
    /// The bus subscription is taken before this returns, so any event
    /// published afterwards is seen by the bridge.
    pub fn start(bus: Arc<EventBus>, outlet: Arc<dyn BridgeOutlet>) -> Arc<Self> {
        let mut rx = bus.subscribe_all();
        let bridge = Arc::new(Self {
            bus,
            forwarded: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            received: AtomicU64::new(0),
            task: Mutex::new(None),
        });

        let weak = Arc::downgrade(&bridge);
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event bridge lagged; events were not forwarded");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(bridge) = weak.upgrade() else {
                    break;
                };
                bridge.handle_local(&event, outlet.as_ref()).await;
            }
        });
        *bridge.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        bridge
    }

    async fn handle_local(&self, event: &Event, outlet: &dyn BridgeOutlet) {
        if !event.is_local() {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let msg = BroadcastMessage::forward_event(event);
        match outlet.forward(msg).await {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!(event_type = %event.event_type, error = %e, "Bridge forward failed");
            }
        }
    }

    /// Publish an event received from the other side on the local bus.
    ///
    /// Returns `false` for frames that are not events.
    pub async fn receive(&self, msg: BroadcastMessage) -> bool {
        match msg {
            BroadcastMessage::EventSync {
                event_type,
                payload,
                hop_count,
            } => {
                self.received.fetch_add(1, Ordering::Relaxed);
                self.bus
                    .publish(Event::with_hops(event_type, payload, hop_count))
                    .await;
                true
            }
            BroadcastMessage::StateSync { .. } => false,
        }
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    /// Stop forwarding.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.stop();
    }
}
