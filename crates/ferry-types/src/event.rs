//! Domain events carried on a context's local event bus.
//!
//! Every event records how many times it has crossed a context boundary.
//! Locally raised events start at hop 0; the bridge forwards only those, so an
//! event that arrived from elsewhere is never sent on again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Well-known event types used by the readiness handshake.
pub mod names {
    /// Asks the host to bring the remote context up.
    pub const WAKE_REMOTE: &str = "remote.wake";
    /// Announces that the remote context has booted and accepts calls.
    pub const REMOTE_INITIALIZED: &str = "remote.initialized";
}

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Create a new random EventId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID (local to the context that created this copy).
    pub id: EventId,
    /// Event type name, e.g. `remote.wake`.
    pub event_type: String,
    /// Arbitrary JSON payload.
    pub payload: Value,
    /// Number of context boundaries this event has crossed.
    pub hop_count: u32,
    /// When this copy was emitted.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// A locally originated event (hop 0).
    pub fn local(event_type: impl Into<String>, payload: Value) -> Self {
        Self::with_hops(event_type, payload, 0)
    }

    /// An event that has already crossed `hop_count` boundaries.
    pub fn with_hops(event_type: impl Into<String>, payload: Value, hop_count: u32) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            payload,
            hop_count,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event was raised in the current context.
    pub fn is_local(&self) -> bool {
        self.hop_count == 0
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}
