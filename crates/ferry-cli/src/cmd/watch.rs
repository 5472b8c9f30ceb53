//! `ferry watch`: follow one state slice.

use super::{connect, report_error, runtime};
use crate::ui;
use ferry_client::{RemoteClient, SliceChange};
use ferry_types::config::FerryConfig;
use ferry_types::error::FerryError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub fn cmd_watch(config: FerryConfig, slice: &str, addr: &str) {
    let rt = runtime();
    if let Err(e) = rt.block_on(watch(config, slice, addr)) {
        report_error(&e, addr);
        std::process::exit(1);
    }
}

/// Subscribe to the mirror, then pull the slice. The snapshot's value comes
/// through the returned receiver like any later push.
async fn follow(
    client: &Arc<RemoteClient>,
    slice: &str,
) -> Result<broadcast::Receiver<SliceChange>, FerryError> {
    let changes = client.mirror().subscribe();
    client.bootstrap_state(&[slice]).await?;
    Ok(changes)
}

async fn watch(config: FerryConfig, slice: &str, addr: &str) -> Result<(), FerryError> {
    let client = connect(&config, addr).await?;
    let mut changes = follow(&client, slice).await?;
    ui::section(&format!("Watching {slice} on {addr}"));

    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) if change.slice == slice => {
                    ui::slice_line(client.name(), slice, change.rev, &change.value.to_string());
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = liveness.tick() => {
                if !client.is_attached() {
                    ui::error("Remote context went away");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
