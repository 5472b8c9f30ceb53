//! End-to-end tests: real remote contexts and clients joined by in-memory and
//! byte-stream transports.
//!
//! Run with: cargo test -p ferry-client --test remote_roundtrip

use async_trait::async_trait;
use ferry_client::{
    spawn_wake_listener, ProxyFactory, ProxyOptions, ReadinessState, RemoteClient, RemoteLauncher,
};
use ferry_kernel::{
    MemorySliceStorage, ModuleContext, ModuleError, ModuleTable, Params, RemoteContext,
    RemoteModule, SliceDef,
};
use ferry_types::config::FerryConfig;
use ferry_types::error::FerryError;
use ferry_types::module::{ModuleInterface, ModuleKey};
use ferry_wire::{MemoryTransport, StreamTransport, Transport};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Test modules
// ---------------------------------------------------------------------------

struct SettingsApi;

impl ModuleInterface for SettingsApi {
    const KEY: &'static str = "settings";
    const METHODS: &'static [&'static str] = &["get", "set"];
}

struct Settings {
    ctx: ModuleContext,
}

#[async_trait]
impl RemoteModule for Settings {
    async fn invoke(&self, method: &str, params: Params) -> Result<Value, ModuleError> {
        match method {
            "get" => Ok(self.ctx.state.get("settings").await.unwrap_or(Value::Null)),
            "set" => {
                let value: Value = params.arg(0)?;
                self.ctx
                    .state
                    .set("settings", value)
                    .await
                    .map_err(|e| ModuleError::Internal(e.to_string()))?;
                Ok(Value::Null)
            }
            other => Err(ModuleError::Internal(format!("unhandled {other}"))),
        }
    }
}

struct EchoApi;

impl ModuleInterface for EchoApi {
    const KEY: &'static str = "echo";
    const METHODS: &'static [&'static str] = &["delay"];
    const DEFERRED_RESOLVE: bool = true;
}

struct Echo;

#[async_trait]
impl RemoteModule for Echo {
    async fn invoke(&self, _method: &str, params: Params) -> Result<Value, ModuleError> {
        let ms: u64 = params.arg(0)?;
        let value: Value = params.arg(1)?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn table() -> ModuleTable {
    ModuleTable::new()
        .register::<SettingsApi, _, _, _>(|ctx| async move { Ok(Settings { ctx }) })
        .register::<EchoApi, _, _, _>(|_ctx| async { Ok(Echo) })
}

fn slices() -> Vec<SliceDef> {
    vec![SliceDef::new("settings", json!({"theme": "light"}))]
}

fn config(timeout_ms: u64) -> FerryConfig {
    FerryConfig {
        handshake_timeout_ms: timeout_ms,
        ..FerryConfig::default()
    }
}

async fn ready_remote() -> Arc<RemoteContext> {
    RemoteContext::start(
        FerryConfig::default(),
        table(),
        slices(),
        Arc::new(MemorySliceStorage::new()),
    )
    .await
    .unwrap()
}

async fn connect(remote: &Arc<RemoteContext>, client: &Arc<RemoteClient>) {
    let (client_end, remote_end) = MemoryTransport::pair(client.name(), "remote");
    remote.attach_client(Arc::new(remote_end)).await.unwrap();
    client.attach(Arc::new(client_end)).unwrap();
}

async fn connected_client(remote: &Arc<RemoteContext>) -> Arc<RemoteClient> {
    let client = RemoteClient::new(config(1_000));
    connect(remote, &client).await;
    client
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for: {what}");
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_proxy_is_memoized_per_module() {
    let remote = ready_remote().await;
    let factory = ProxyFactory::new(connected_client(&remote).await);

    let a = factory.proxy::<SettingsApi>();
    let b = factory.proxy::<SettingsApi>();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.call("get", vec![]).await.unwrap(), json!({"theme": "light"}));
}

#[tokio::test]
async fn test_concurrent_calls_share_one_wake() {
    let remote = RemoteContext::boot(
        FerryConfig::default(),
        table(),
        slices(),
        Arc::new(MemorySliceStorage::new()),
    )
    .await
    .unwrap();
    let client = connected_client(&remote).await;
    let factory = Arc::new(ProxyFactory::new(Arc::clone(&client)));

    let mut calls = Vec::new();
    for i in 0..5 {
        let echo = factory.proxy::<EchoApi>();
        calls.push(tokio::spawn(async move {
            echo.call("delay", vec![json!(0), json!(i)]).await
        }));
    }

    eventually("wake signal", || client.gate().wake_signals() == 1).await;
    assert_eq!(client.readiness(), ReadinessState::Initializing);

    remote.set_ready(true).await;
    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), json!(i));
    }
    assert_eq!(client.gate().wake_signals(), 1);
    assert_eq!(client.readiness(), ReadinessState::Ready);
}

#[tokio::test]
async fn test_handshake_timeout_is_retryable() {
    let client = RemoteClient::new(config(100));
    let factory = ProxyFactory::new(Arc::clone(&client));
    let settings = factory.proxy::<SettingsApi>();

    let err = settings.call("get", vec![]).await.unwrap_err();
    assert_eq!(err, FerryError::HandshakeTimeout { timeout_ms: 100 });
    assert!(err.is_retryable());
    assert_eq!(client.readiness(), ReadinessState::Failed);
    assert!(client.gate().last_handshake_failed());

    // The next call starts a fresh handshake instead of staying failed.
    let err = settings.call("get", vec![]).await.unwrap_err();
    assert_eq!(err, FerryError::HandshakeTimeout { timeout_ms: 100 });
    assert_eq!(client.gate().wake_signals(), 2);

    // And once a remote exists, the same proxy goes through.
    let remote = ready_remote().await;
    connect(&remote, &client).await;
    assert_eq!(
        settings.call("get", vec![]).await.unwrap(),
        json!({"theme": "light"})
    );
    assert!(!client.gate().last_handshake_failed());
}

#[tokio::test]
async fn test_results_resolve_out_of_request_order() {
    let remote = ready_remote().await;
    let factory = ProxyFactory::new(connected_client(&remote).await);
    let echo = factory.proxy::<EchoApi>();
    // Handshake first so both calls hit the wire back to back.
    echo.call("delay", vec![json!(0), json!(null)]).await.unwrap();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let slow = Arc::clone(&echo);
    let tx = done_tx.clone();
    let a = tokio::spawn(async move {
        let v = slow.call("delay", vec![json!(200), json!("A")]).await.unwrap();
        let _ = tx.send("A");
        v
    });
    let fast = Arc::clone(&echo);
    let b = tokio::spawn(async move {
        let v = fast.call("delay", vec![json!(10), json!("B")]).await.unwrap();
        let _ = done_tx.send("B");
        v
    });

    assert_eq!(done_rx.recv().await, Some("B"));
    assert_eq!(done_rx.recv().await, Some("A"));
    assert_eq!(a.await.unwrap(), json!("A"));
    assert_eq!(b.await.unwrap(), json!("B"));
}

#[tokio::test]
async fn test_state_updates_apply_in_emission_order() {
    let remote = ready_remote().await;
    let client = connected_client(&remote).await;
    let mut changes = client.mirror().subscribe();

    remote.state().set("settings", json!("v1")).await.unwrap();
    remote.state().set("settings", json!("v2")).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.value, json!("v1"));
    assert_eq!(second.value, json!("v2"));
    assert_eq!(client.mirror().get("settings"), Some(json!("v2")));
}

#[tokio::test]
async fn test_state_written_through_a_call_reaches_every_client() {
    let remote = ready_remote().await;
    let writer = connected_client(&remote).await;
    let reader = connected_client(&remote).await;
    let mut reader_changes = reader.mirror().subscribe();

    ProxyFactory::new(Arc::clone(&writer))
        .proxy::<SettingsApi>()
        .call("set", vec![json!({"theme": "dark"})])
        .await
        .unwrap();

    let change = tokio::time::timeout(Duration::from_secs(1), reader_changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.value, json!({"theme": "dark"}));
    eventually("writer mirror", || {
        writer.mirror().get("settings") == Some(json!({"theme": "dark"}))
    })
    .await;
}

#[tokio::test]
async fn test_late_client_bootstraps_snapshot() {
    let remote = ready_remote().await;
    remote
        .state()
        .set("settings", json!({"theme": "dark"}))
        .await
        .unwrap();

    let late = connected_client(&remote).await;
    assert_eq!(late.mirror().get("settings"), None);
    assert_eq!(late.bootstrap_state(&["settings"]).await.unwrap(), 1);
    assert_eq!(late.mirror().get("settings"), Some(json!({"theme": "dark"})));

    let err = late.bootstrap_state(&["nope"]).await.unwrap_err();
    match err {
        FerryError::RemoteExecution { origin, .. } => {
            assert_eq!(origin.as_deref(), Some("UnknownSlice"))
        }
        other => panic!("Expected RemoteExecution, got {other:?}"),
    }
}

#[tokio::test]
async fn test_events_cross_at_most_one_hop() {
    let remote = ready_remote().await;
    let a = connected_client(&remote).await;
    let b = connected_client(&remote).await;
    let mut a_events = a.events().subscribe_type("remote.thing");

    remote.emit("remote.thing", json!({"n": 1})).await;
    let got = tokio::time::timeout(Duration::from_secs(1), a_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.hop_count, 1);

    a.emit("client.thing", json!({"n": 2})).await;
    eventually("remote receives client event", || {
        remote.bridge_stats().received == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = remote.bridge_stats();
    // Only the remote's own event went out; the client's stopped at hop 1.
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.refused, 1);
    // Nothing a client received was sent back.
    assert_eq!(a.bridge().stats().forwarded, 1);
    assert_eq!(b.bridge().stats().forwarded, 0);
    let b_history = b.events().history(100).await;
    assert!(b_history.iter().all(|e| e.event_type != "client.thing"));
}

#[tokio::test]
async fn test_unknown_module_and_method_are_named() {
    let remote = ready_remote().await;
    let factory = ProxyFactory::new(connected_client(&remote).await);

    let err = factory
        .proxy_for("vault", ProxyOptions::default())
        .call("open", vec![])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FerryError::UnknownModule {
            module: ModuleKey::new("vault")
        }
    );
    assert_eq!(err.to_string(), "Unknown module: vault");

    let err = factory
        .proxy_for("settings", ProxyOptions::default())
        .call("explode", vec![])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown method: settings.explode");
}

#[tokio::test]
async fn test_probe_while_ready_never_wakes() {
    let remote = ready_remote().await;
    let client = connected_client(&remote).await;
    client.wait_until_ready().await.unwrap();

    for _ in 0..5 {
        assert!(client.probe_remote().await.unwrap());
        client.wait_until_ready().await.unwrap();
    }
    assert_eq!(client.gate().wake_signals(), 0);
    assert!(client.gate().is_ready());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_proxy_survives_remote_restart() {
    let storage = Arc::new(MemorySliceStorage::new());
    let persisted = || vec![SliceDef::new("settings", json!({"theme": "light"})).persisted()];

    let first = RemoteContext::start(
        FerryConfig::default(),
        table(),
        persisted(),
        storage.clone(),
    )
    .await
    .unwrap();
    let client = connected_client(&first).await;
    let settings = ProxyFactory::new(Arc::clone(&client)).proxy::<SettingsApi>();
    settings
        .call("set", vec![json!({"theme": "dark"})])
        .await
        .unwrap();

    first.shutdown();
    drop(first);
    eventually("disconnect observed", || !client.is_attached()).await;
    assert_eq!(client.readiness(), ReadinessState::Uninitialized);

    let second = RemoteContext::start(FerryConfig::default(), table(), persisted(), storage)
        .await
        .unwrap();
    connect(&second, &client).await;
    assert_eq!(second.registry().constructed_count(), 0);

    // Same proxy, new remote, state restored from storage.
    assert_eq!(
        settings.call("get", vec![]).await.unwrap(),
        json!({"theme": "dark"})
    );
    // system (probe) and settings were built fresh.
    assert_eq!(second.registry().constructed_count(), 2);
}

struct InProcessLauncher {
    launched: Mutex<Vec<Arc<RemoteContext>>>,
}

#[async_trait]
impl RemoteLauncher for InProcessLauncher {
    async fn launch(&self) -> Result<Arc<dyn Transport>, FerryError> {
        let remote = RemoteContext::start(
            FerryConfig::default(),
            table(),
            slices(),
            Arc::new(MemorySliceStorage::new()),
        )
        .await
        .map_err(|e| FerryError::Transport(e.to_string()))?;
        let (client_end, remote_end) = MemoryTransport::pair("client", "remote");
        remote.attach_client(Arc::new(remote_end)).await?;
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(remote);
        Ok(Arc::new(client_end))
    }
}

#[tokio::test]
async fn test_wake_launches_remote_on_demand() {
    let client = RemoteClient::new(config(1_000));
    let launcher = Arc::new(InProcessLauncher {
        launched: Mutex::new(Vec::new()),
    });
    let listener = spawn_wake_listener(Arc::clone(&client), launcher.clone());

    let echo = ProxyFactory::new(Arc::clone(&client)).proxy::<EchoApi>();
    let resolved = echo.resolve().await.unwrap();
    assert!(Arc::ptr_eq(&echo, &resolved));
    assert_eq!(
        resolved.call("delay", vec![json!(0), json!("up")]).await.unwrap(),
        json!("up")
    );
    assert_eq!(client.gate().wake_signals(), 1);
    assert_eq!(launcher.launched.lock().unwrap().len(), 1);
    listener.abort();
}

#[tokio::test]
async fn test_relaunched_remote_replaces_mirrored_state() {
    let client = RemoteClient::new(config(1_000));
    let launcher = Arc::new(InProcessLauncher {
        launched: Mutex::new(Vec::new()),
    });
    let listener = spawn_wake_listener(Arc::clone(&client), launcher.clone());
    let settings = ProxyFactory::new(Arc::clone(&client)).proxy::<SettingsApi>();

    settings
        .call("set", vec![json!({"theme": "dark"})])
        .await
        .unwrap();
    eventually("mirror sees dark", || {
        client.mirror().get("settings") == Some(json!({"theme": "dark"}))
    })
    .await;

    // The slice is not persisted, so the next remote starts from its default.
    let first = launcher.launched.lock().unwrap().remove(0);
    first.shutdown();
    drop(first);
    eventually("disconnect observed", || !client.is_attached()).await;
    assert_eq!(
        client.mirror().get("settings"),
        Some(json!({"theme": "dark"}))
    );

    assert_eq!(
        settings.call("get", vec![]).await.unwrap(),
        json!({"theme": "light"})
    );
    assert_eq!(launcher.launched.lock().unwrap().len(), 1);
    assert!(!client.mirror().is_stale());
    assert_eq!(
        client.mirror().get("settings"),
        Some(json!({"theme": "light"}))
    );
    assert_eq!(client.mirror().rev("settings"), Some(1));
    listener.abort();
}

#[tokio::test]
async fn test_calls_over_a_byte_stream() {
    let remote = ready_remote().await;
    let client = RemoteClient::new(config(1_000));
    let (a, b) = tokio::io::duplex(64 * 1024);
    remote
        .attach_client(Arc::new(StreamTransport::new("client", b, 1024 * 1024)))
        .await
        .unwrap();
    client
        .attach(Arc::new(StreamTransport::new("remote", a, 1024 * 1024)))
        .unwrap();

    let settings = ProxyFactory::new(Arc::clone(&client)).proxy::<SettingsApi>();
    settings
        .call("set", vec![json!({"theme": "solar"})])
        .await
        .unwrap();
    assert_eq!(
        settings.call_as::<Value>("get", vec![]).await.unwrap(),
        json!({"theme": "solar"})
    );
    eventually("mirror update over stream", || {
        client.mirror().get("settings") == Some(json!({"theme": "solar"}))
    })
    .await;
}
