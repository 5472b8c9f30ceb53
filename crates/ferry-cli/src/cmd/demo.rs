//! `ferry demo`: a remote context and several clients in one process.
//!
//! The remote boots unready. The first call from any client probes it, gets
//! "not ready" and raises the wake signal; a stand-in host task answers the
//! bridged wake by marking the remote ready, which releases every queued call.

use super::runtime;
use crate::modules::{self, EchoApi, SettingsApi, SETTINGS_SLICE};
use crate::ui;
use ferry_client::{ProxyFactory, RemoteClient};
use ferry_kernel::{MemorySliceStorage, RemoteContext};
use ferry_types::config::FerryConfig;
use ferry_types::event::names;
use ferry_wire::MemoryTransport;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub fn cmd_demo(config: FerryConfig, clients: usize) {
    let rt = runtime();
    if let Err(e) = rt.block_on(demo(config, clients.max(1))) {
        ui::error(&e);
        std::process::exit(1);
    }
}

async fn demo(config: FerryConfig, count: usize) -> Result<(), String> {
    let remote = RemoteContext::boot(
        config.clone(),
        modules::module_table(),
        modules::slices(),
        Arc::new(MemorySliceStorage::new()),
    )
    .await
    .map_err(|e| e.to_string())?;

    // Stand-in for the host that renders the remote surface on demand.
    let host_remote = Arc::clone(&remote);
    let wake = remote.events().once(names::WAKE_REMOTE);
    tokio::spawn(async move {
        if wake.await.is_some() {
            tokio::time::sleep(Duration::from_millis(100)).await;
            host_remote.set_ready(true).await;
        }
    });

    let mut factories = Vec::with_capacity(count);
    for i in 0..count {
        let client = RemoteClient::new(FerryConfig {
            client_name: format!("client-{i}"),
            ..config.clone()
        });
        let (client_end, remote_end) = MemoryTransport::pair(client.name(), "remote");
        remote
            .attach_client(Arc::new(remote_end))
            .await
            .map_err(|e| e.to_string())?;
        client
            .attach(Arc::new(client_end))
            .map_err(|e| e.to_string())?;
        factories.push(ProxyFactory::new(client));
    }

    ui::section(&format!("{count} clients calling an unready remote"));
    let mut calls = Vec::new();
    for (i, factory) in factories.iter().enumerate() {
        let echo = factory.proxy::<EchoApi>();
        calls.push(tokio::spawn(async move {
            echo.call("delay", vec![json!(10 * i), json!(i)]).await
        }));
    }
    for (i, call) in calls.into_iter().enumerate() {
        match call.await {
            Ok(Ok(value)) => ui::success(&format!("client-{i} echo.delay -> {value}")),
            Ok(Err(e)) => ui::error(&format!("client-{i}: {e}")),
            Err(e) => ui::error(&format!("client-{i} task failed: {e}")),
        }
    }
    for factory in &factories {
        let client = factory.client();
        ui::kv(
            client.name(),
            &format!(
                "{:?}, wake signals: {}",
                client.readiness(),
                client.gate().wake_signals()
            ),
        );
    }
    ui::blank();

    ui::section("State written by client-0, mirrored everywhere");
    for factory in &factories {
        factory
            .client()
            .bootstrap_state(&[SETTINGS_SLICE])
            .await
            .map_err(|e| e.to_string())?;
    }
    factories[0]
        .proxy::<SettingsApi>()
        .call("set", vec![json!("theme"), json!("dark")])
        .await
        .map_err(|e| e.to_string())?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    for factory in &factories {
        print_mirror(factory.client());
    }
    ui::blank();

    ui::section("Events cross one boundary");
    let last = factories[count - 1].client();
    last.emit("demo.ping", json!({"from": last.name()})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = remote.bridge_stats();
    ui::kv("forwarded", &stats.forwarded.to_string());
    ui::kv("refused", &stats.refused.to_string());
    ui::kv("received", &stats.received.to_string());
    for factory in &factories {
        let seen = factory
            .client()
            .events()
            .history(100)
            .await
            .iter()
            .filter(|e| e.event_type == "settings.changed")
            .count();
        ui::kv(factory.client().name(), &format!("settings.changed seen {seen}x"));
    }

    remote.shutdown();
    ui::blank();
    ui::success("Demo complete");
    Ok(())
}

fn print_mirror(client: &Arc<RemoteClient>) {
    let mirror = client.mirror();
    match (mirror.get(SETTINGS_SLICE), mirror.rev(SETTINGS_SLICE)) {
        (Some(value), Some(rev)) => {
            ui::slice_line(client.name(), SETTINGS_SLICE, rev, &value.to_string())
        }
        _ => ui::kv(client.name(), "(no mirrored value)"),
    }
}
