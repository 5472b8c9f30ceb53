//! Event bus: a context's local pub/sub with per-type channels and a history
//! ring buffer.

use dashmap::DashMap;
use ferry_types::event::Event;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Default number of events retained in the history ring buffer.
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// The local event bus of one context.
pub struct EventBus {
    /// Broadcast channel for all events.
    sender: broadcast::Sender<Event>,
    /// Per-event-type channels.
    type_channels: DashMap<String, broadcast::Sender<Event>>,
    /// Event history ring buffer.
    history: Arc<RwLock<VecDeque<Event>>>,
    history_size: usize,
}

impl EventBus {
    /// Create a new event bus with the default history size.
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY_SIZE)
    }

    /// Create a new event bus retaining up to `history_size` events.
    pub fn with_history(history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            type_channels: DashMap::new(),
            history: Arc::new(RwLock::new(VecDeque::with_capacity(history_size))),
            history_size,
        }
    }

    /// Publish an event to the bus.
    pub async fn publish(&self, event: Event) {
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            hop_count = event.hop_count,
            "Publishing event"
        );

        // Store in history
        if self.history_size > 0 {
            let mut history = self.history.write().await;
            if history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        if let Some(sender) = self.type_channels.get(&event.event_type) {
            let _ = sender.send(event.clone());
        }
        let _ = self.sender.send(event);
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe to events of one type.
    pub fn subscribe_type(&self, event_type: &str) -> broadcast::Receiver<Event> {
        let entry = self
            .type_channels
            .entry(event_type.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(256);
                tx
            });
        entry.subscribe()
    }

    /// Wait for the next event of `event_type`.
    ///
    /// The subscription is taken when `once` is called, not when the returned
    /// future is first polled, so an event published in between is not missed.
    /// Resolves to `None` only if the bus is dropped.
    pub fn once(&self, event_type: &str) -> impl Future<Output = Option<Event>> + Send + 'static {
        let mut rx = self.subscribe_type(event_type);
        async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }

    /// Get recent event history, newest first.
    pub async fn history(&self, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
