//! RemoteContext: the privileged context that hosts modules and owns state.
//!
//! A running remote context has:
//! - a module registry answering calls from every attached client
//! - a state store whose writes are pushed to every attached client, in order
//! - an event bus bridged to every attached client
//! - a readiness flag answered by `system.isReady` and announced with the
//!   initialized signal

use crate::error::{KernelError, KernelResult};
use crate::module::ModuleContext;
use crate::registry::{ModuleRegistry, ModuleTable, ORIGIN_PANIC};
use crate::state::{SliceDef, StateStore};
use crate::storage::SliceStorage;
use crate::system::SystemModule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ferry_types::broadcast::BroadcastMessage;
use ferry_types::config::FerryConfig;
use ferry_types::envelope::{CallEnvelope, CallResult, RemoteFailure};
use ferry_types::error::FerryError;
use ferry_types::event::{names, Event};
use ferry_types::module::SystemApi;
use ferry_wire::{BridgeOutlet, BridgeStats, EventBridge, EventBus, Transport, WireError, WireMessage};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier of one attached client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public view of an attached client.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ClientId,
    pub peer: String,
    pub attached_at: DateTime<Utc>,
}

struct AttachedClient {
    transport: Arc<dyn Transport>,
    attached_at: DateTime<Utc>,
}

/// The initialized signal as it arrives at a client: a bridged event that
/// has crossed one boundary.
fn initialized_signal() -> WireMessage {
    BroadcastMessage::EventSync {
        event_type: names::REMOTE_INITIALIZED.to_string(),
        payload: Value::Null,
        hop_count: 1,
    }
    .into()
}

/// Dispatch on the registry and always produce a result for the envelope's
/// correlation id, even if dispatch itself panics.
async fn dispatch_answered(registry: &ModuleRegistry, envelope: CallEnvelope) -> CallResult {
    let correlation_id = envelope.correlation_id.clone();
    let call = format!("{}.{}", envelope.module, envelope.method);
    match AssertUnwindSafe(registry.dispatch(envelope)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            warn!(call = %call, %correlation_id, "Dispatch panicked");
            CallResult::err(
                correlation_id,
                RemoteFailure::execution(ORIGIN_PANIC, format!("{call} panicked")),
            )
        }
    }
}

/// Sends a frame to every attached client.
#[derive(Clone)]
struct Fanout {
    clients: Arc<DashMap<ClientId, AttachedClient>>,
}

impl Fanout {
    async fn send_all(&self, msg: WireMessage) {
        // Collect first so no map guard is held across an await.
        let targets: Vec<(ClientId, Arc<dyn Transport>)> = self
            .clients
            .iter()
            .map(|e| (*e.key(), Arc::clone(&e.value().transport)))
            .collect();
        for (id, transport) in targets {
            if let Err(e) = transport.send(msg.clone()).await {
                debug!(client = %id, kind = msg.kind(), error = %e, "Fan-out send failed");
            }
        }
    }
}

#[async_trait]
impl BridgeOutlet for Fanout {
    async fn forward(&self, msg: BroadcastMessage) -> Result<(), WireError> {
        self.send_all(msg.into()).await;
        Ok(())
    }
}

/// The remote context.
pub struct RemoteContext {
    config: FerryConfig,
    registry: Arc<ModuleRegistry>,
    state: Arc<StateStore>,
    events: Arc<EventBus>,
    bridge: Arc<EventBridge>,
    fanout: Fanout,
    ready: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    client_tasks: Arc<DashMap<ClientId, JoinHandle<()>>>,
}

impl RemoteContext {
    /// Boot a remote context and announce it ready.
    pub async fn start(
        config: FerryConfig,
        table: ModuleTable,
        slices: Vec<SliceDef>,
        storage: Arc<dyn SliceStorage>,
    ) -> KernelResult<Arc<Self>> {
        let remote = Self::boot(config, table, slices, storage).await?;
        remote.set_ready(true).await;
        Ok(remote)
    }

    /// Boot a remote context without announcing it ready.
    ///
    /// `system.isReady` answers false and wake signals go unanswered until
    /// [`set_ready`](Self::set_ready) is called.
    pub async fn boot(
        config: FerryConfig,
        table: ModuleTable,
        slices: Vec<SliceDef>,
        storage: Arc<dyn SliceStorage>,
    ) -> KernelResult<Arc<Self>> {
        info!("Booting remote context");

        let (state, mut fanout_rx) = StateStore::init(slices, storage).await?;
        let events = Arc::new(EventBus::with_history(config.event_history));
        let ready = Arc::new(AtomicBool::new(false));

        let system_ready = Arc::clone(&ready);
        let system_state = Arc::clone(&state);
        let table = table.register::<SystemApi, _, _, _>(move |_ctx| {
            let module = SystemModule::new(Arc::clone(&system_ready), Arc::clone(&system_state));
            async move { Ok(module) }
        });
        if let Some(dup) = table.duplicates().first() {
            return Err(KernelError::BootFailed(format!(
                "module registered more than once: {dup}"
            )));
        }

        let registry = Arc::new(ModuleRegistry::new(
            table,
            ModuleContext {
                state: Arc::clone(&state),
                events: Arc::clone(&events),
            },
        ));

        let fanout = Fanout {
            clients: Arc::new(DashMap::new()),
        };
        let mut tasks = Vec::new();

        // State pump: one task drains the ordered queue, so per-slice order
        // holds for every client.
        let pump = fanout.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(msg) = fanout_rx.recv().await {
                pump.send_all(msg.into()).await;
            }
        }));

        let bridge = EventBridge::start(Arc::clone(&events), Arc::new(fanout.clone()));

        // A client asking to wake an already running remote gets a fresh
        // initialized announcement.
        let mut wake_rx = events.subscribe_type(names::WAKE_REMOTE);
        let wake_fanout = fanout.clone();
        let wake_ready = Arc::clone(&ready);
        tasks.push(tokio::spawn(async move {
            loop {
                match wake_rx.recv().await {
                    Ok(event) => {
                        if wake_ready.load(Ordering::SeqCst) {
                            debug!(hop_count = event.hop_count, "Wake received, re-announcing");
                            wake_fanout.send_all(initialized_signal()).await;
                        } else {
                            debug!("Wake received before ready, ignoring");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        info!(modules = registry.keys().len(), "Remote context booted");
        Ok(Arc::new(Self {
            config,
            registry,
            state,
            events,
            bridge,
            fanout,
            ready,
            tasks: Mutex::new(tasks),
            client_tasks: Arc::new(DashMap::new()),
        }))
    }

    /// Set the readiness flag. Setting it to true announces the initialized
    /// signal to every attached client before returning.
    pub async fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        if ready {
            info!(clients = self.client_count(), "Remote context ready");
            self.fanout.send_all(initialized_signal()).await;
        } else {
            info!("Remote context marked not ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Attach a client transport and start serving it.
    pub async fn attach_client(&self, transport: Arc<dyn Transport>) -> Result<ClientId, FerryError> {
        let mut inbound = transport.take_inbound().ok_or_else(|| {
            FerryError::Transport(format!(
                "inbound stream of {} already taken",
                transport.peer_name()
            ))
        })?;

        let id = ClientId::new();
        self.fanout.clients.insert(
            id,
            AttachedClient {
                transport: Arc::clone(&transport),
                attached_at: Utc::now(),
            },
        );
        info!(client = %id, peer = transport.peer_name(), "Client attached");

        if self.is_ready() {
            if let Err(e) = transport.send(initialized_signal()).await {
                debug!(client = %id, error = %e, "Failed to greet client");
            }
        }

        let registry = Arc::clone(&self.registry);
        let bridge = Arc::clone(&self.bridge);
        let clients = Arc::clone(&self.fanout.clients);
        let client_tasks = Arc::clone(&self.client_tasks);
        // The loop waits until its handle is registered, so its own removal
        // below always finds it.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = registered_rx.await;
            while let Some(msg) = inbound.recv().await {
                match msg {
                    WireMessage::Call(envelope) => {
                        let registry = Arc::clone(&registry);
                        let reply_to = Arc::clone(&transport);
                        // Calls run concurrently; results return in completion order.
                        tokio::spawn(async move {
                            let result = dispatch_answered(&registry, envelope).await;
                            if let Err(e) = reply_to.send(result.into()).await {
                                debug!(client = %id, error = %e, "Result undeliverable, caller gone");
                            }
                        });
                    }
                    WireMessage::Broadcast(msg @ BroadcastMessage::EventSync { .. }) => {
                        bridge.receive(msg).await;
                    }
                    WireMessage::Broadcast(BroadcastMessage::StateSync { slice, .. }) => {
                        warn!(client = %id, slice = %slice, "Ignoring state push from a client");
                    }
                    WireMessage::Result(result) => {
                        warn!(
                            client = %id,
                            correlation_id = %result.correlation_id,
                            "Ignoring call result sent to the remote context"
                        );
                    }
                }
            }
            clients.remove(&id);
            client_tasks.remove(&id);
            info!(client = %id, "Client detached");
        });
        self.client_tasks.insert(id, handle);
        let _ = registered_tx.send(());
        Ok(id)
    }

    /// Publish a locally originated event; it is bridged to every client.
    pub async fn emit(&self, event_type: &str, payload: Value) {
        self.events.publish(Event::local(event_type, payload)).await;
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &FerryConfig {
        &self.config
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    /// Currently attached clients.
    pub fn connected_clients(&self) -> Vec<ClientInfo> {
        self.fanout
            .clients
            .iter()
            .map(|e| ClientInfo {
                id: *e.key(),
                peer: e.value().transport.peer_name().to_string(),
                attached_at: e.value().attached_at,
            })
            .collect()
    }

    /// Client connection loops still running.
    pub fn client_task_count(&self) -> usize {
        self.client_tasks.len()
    }

    pub fn client_count(&self) -> usize {
        self.fanout.clients.len()
    }

    /// Tear the context down: stop every loop and drop every client
    /// transport. Module instances go with it.
    pub fn shutdown(&self) {
        info!("Shutting down remote context");
        self.ready.store(false, Ordering::SeqCst);
        self.bridge.stop();
        for handle in self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
        for entry in self.client_tasks.iter() {
            entry.value().abort();
        }
        self.client_tasks.clear();
        self.fanout.clients.clear();
    }
}

impl Drop for RemoteContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
