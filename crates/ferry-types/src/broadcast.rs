//! Fan-out messages pushed from one context to its peers.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A broadcast frame.
///
/// Wire shapes:
/// `{ "kind": "STATE_SYNC", "slice": ..., "value": ..., "rev": ... }` and
/// `{ "kind": "EVENT_SYNC", "type": ..., "payload": ..., "hopCount": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BroadcastMessage {
    /// Replacement value for a remote-owned state slice.
    #[serde(rename = "STATE_SYNC")]
    StateSync {
        slice: String,
        value: Value,
        /// Per-slice revision; 0 means unversioned.
        #[serde(default, skip_serializing_if = "is_zero")]
        rev: u64,
    },
    /// A bridged domain event.
    #[serde(rename = "EVENT_SYNC")]
    EventSync {
        #[serde(rename = "type")]
        event_type: String,
        #[serde(default)]
        payload: Value,
        #[serde(rename = "hopCount")]
        hop_count: u32,
    },
}

/// A slice value with its revision, as returned by the bootstrap snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSnapshot {
    pub value: Value,
    pub rev: u64,
}

fn is_zero(rev: &u64) -> bool {
    *rev == 0
}

impl BroadcastMessage {
    /// Wrap an event for crossing the boundary, adding exactly one hop.
    pub fn forward_event(event: &Event) -> Self {
        BroadcastMessage::EventSync {
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            hop_count: event.hop_count + 1,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &str {
        match self {
            BroadcastMessage::StateSync { slice, .. } => slice,
            BroadcastMessage::EventSync { event_type, .. } => event_type,
        }
    }
}
