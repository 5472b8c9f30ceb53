//! Command implementations.

pub mod call;
pub mod config;
pub mod demo;
pub mod serve;
pub mod watch;

use crate::ui;
use ferry_client::RemoteClient;
use ferry_types::config::FerryConfig;
use ferry_types::error::FerryError;
use ferry_wire::StreamTransport;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Build a multi-threaded runtime, exiting if the OS refuses one.
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    }
}

/// Connect a client context to a remote served over TCP.
pub(crate) async fn connect(
    config: &FerryConfig,
    addr: &str,
) -> Result<Arc<RemoteClient>, FerryError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| FerryError::Transport(format!("connect {addr}: {e}")))?;
    let _ = stream.set_nodelay(true);
    let client = RemoteClient::new(config.clone());
    client.attach(Arc::new(StreamTransport::new(
        addr,
        stream,
        config.max_frame_bytes,
    )))?;
    Ok(client)
}

/// Parse a positional parameter as JSON, or take it as a plain string.
pub(crate) fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Print a call failure with a hint matching its kind.
pub(crate) fn report_error(err: &FerryError, addr: &str) {
    match err {
        FerryError::Transport(_) | FerryError::HandshakeTimeout { .. } => {
            ui::error_with_fix(&err.to_string(), &format!("start one with `ferry serve --listen {addr}`"))
        }
        FerryError::UnknownModule { .. } | FerryError::UnknownMethod { .. } => {
            ui::error(&err.to_string());
            ui::hint("`ferry serve` provides settings.{get,set,reset} and echo.{echo,delay}");
        }
        _ => ui::error(&err.to_string()),
    }
}
