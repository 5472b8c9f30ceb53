//! Bringing the remote context up when a client asks for it.

use crate::connection::RemoteClient;
use async_trait::async_trait;
use ferry_types::error::FerryError;
use ferry_types::event::names;
use ferry_wire::Transport;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Creates the remote surface (spawns a process, opens a hidden document,
/// starts an in-process context) and returns a transport to it.
#[async_trait]
pub trait RemoteLauncher: Send + Sync + 'static {
    async fn launch(&self) -> Result<Arc<dyn Transport>, FerryError>;
}

/// Launch and attach the remote whenever this client raises a wake signal
/// while it has no live transport. Mirrored state from a previous remote is
/// refreshed once the new one is ready.
pub fn spawn_wake_listener(
    client: Arc<RemoteClient>,
    launcher: Arc<dyn RemoteLauncher>,
) -> JoinHandle<()> {
    let mut wakes = client.events().subscribe_type(names::WAKE_REMOTE);
    tokio::spawn(async move {
        loop {
            let event = match wakes.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !event.is_local() || client.is_attached() {
                continue;
            }
            match launcher.launch().await {
                Ok(transport) => {
                    info!(client = client.name(), peer = transport.peer_name(), "Remote launched");
                    if let Err(e) = client.attach(transport) {
                        warn!(error = %e, "Failed to attach launched remote");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to launch remote"),
            }
        }
    })
}
