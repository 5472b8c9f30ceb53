//! Process configuration shared by remote and client contexts.

use crate::host::HostPlatform;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default readiness handshake window (milliseconds).
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;

/// Default maximum frame size for stream transports (16 MB).
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Top-level ferry configuration, loaded from `~/.ferry/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Host platform this process runs as.
    pub host: HostPlatform,
    /// How long a readiness handshake may take before it fails.
    pub handshake_timeout_ms: u64,
    /// Event bus history ring buffer size.
    pub event_history: usize,
    /// Largest frame a stream transport accepts.
    pub max_frame_bytes: u32,
    /// Address `ferry serve` listens on and clients connect to.
    pub listen_addr: String,
    /// Endpoint name clients announce in logs.
    pub client_name: String,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: HostPlatform::default(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            event_history: 1000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            listen_addr: "127.0.0.1:7420".to_string(),
            client_name: "client".to_string(),
        }
    }
}

impl FerryConfig {
    /// The handshake window as a `Duration`.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
