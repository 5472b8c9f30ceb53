//! Ferry wire layer: how contexts talk to each other.
//!
//! ## Architecture
//!
//! - **WireMessage**: the union of call, result and broadcast frames
//! - **Transport**: asynchronous, bidirectional delivery to one named peer
//! - **MemoryTransport** / **StreamTransport**: in-process and byte-stream transports
//! - **EventBus**: a context's local pub/sub bus
//! - **EventBridge**: replicates locally raised events across the boundary, once

pub mod bridge;
pub mod bus;
pub mod memory;
pub mod message;
pub mod stream;
pub mod transport;

pub use bridge::{BridgeOutlet, BridgeStats, EventBridge};
pub use bus::EventBus;
pub use memory::MemoryTransport;
pub use message::WireMessage;
pub use stream::StreamTransport;
pub use transport::{Inbound, Transport, WireError};
