//! `ferry serve`: host the remote context and accept clients over TCP.

use super::runtime;
use crate::{modules, ui};
use ferry_kernel::{MemorySliceStorage, RemoteContext};
use ferry_types::config::FerryConfig;
use ferry_wire::StreamTransport;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub fn cmd_serve(config: FerryConfig, listen: &str) {
    let rt = runtime();
    if let Err(e) = rt.block_on(serve(config, listen)) {
        ui::error_with_fix(&e, "pick another address with --listen");
        std::process::exit(1);
    }
}

async fn serve(config: FerryConfig, listen: &str) -> Result<(), String> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| format!("bind {listen}: {e}"))?;
    let max_frame = config.max_frame_bytes;
    let remote = RemoteContext::start(
        config,
        modules::module_table(),
        modules::slices(),
        Arc::new(MemorySliceStorage::new()),
    )
    .await
    .map_err(|e| e.to_string())?;

    ui::section("ferry remote context");
    ui::kv_ok("Listening", listen);
    let keys: Vec<String> = remote
        .registry()
        .keys()
        .iter()
        .map(|k| k.to_string())
        .collect();
    ui::kv("Modules", &keys.join(", "));
    ui::kv("Slices", &remote.state().slice_names().await.join(", "));
    ui::hint("Ctrl+C to stop");
    ui::blank();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    let transport = StreamTransport::new(peer.to_string(), stream, max_frame);
                    match remote.attach_client(Arc::new(transport)).await {
                        Ok(id) => info!(client = %id, peer = %peer, "Accepted client"),
                        Err(e) => warn!(peer = %peer, error = %e, "Failed to attach client"),
                    }
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    remote.shutdown();
    ui::success("Remote context stopped");
    Ok(())
}
