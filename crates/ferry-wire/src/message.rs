//! Wire protocol message types.
//!
//! A frame is one of the three shapes the contexts exchange: a call, a call
//! result, or a broadcast. The shapes are structurally disjoint, so frames are
//! serialized without an extra tag. Stream transports prefix each JSON frame
//! with a 4-byte big-endian length header.

use ferry_types::broadcast::BroadcastMessage;
use ferry_types::envelope::{CallEnvelope, CallResult};
use serde::{Deserialize, Serialize};

/// A wire protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    /// A call envelope (client → remote).
    Call(CallEnvelope),
    /// A call result (remote → the calling client only).
    Result(CallResult),
    /// State or event fan-out.
    Broadcast(BroadcastMessage),
}

impl WireMessage {
    /// Short frame kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Call(_) => "call",
            WireMessage::Result(_) => "result",
            WireMessage::Broadcast(BroadcastMessage::StateSync { .. }) => "state_sync",
            WireMessage::Broadcast(BroadcastMessage::EventSync { .. }) => "event_sync",
        }
    }
}

impl From<CallEnvelope> for WireMessage {
    fn from(env: CallEnvelope) -> Self {
        WireMessage::Call(env)
    }
}

impl From<CallResult> for WireMessage {
    fn from(result: CallResult) -> Self {
        WireMessage::Result(result)
    }
}

impl From<BroadcastMessage> for WireMessage {
    fn from(msg: BroadcastMessage) -> Self {
        WireMessage::Broadcast(msg)
    }
}

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}
