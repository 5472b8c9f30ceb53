//! RemoteClient: one client context's connection to the remote context.
//!
//! Owns the transport slot, the table of pending calls keyed by correlation
//! id, the readiness gate, the local event bus with its bridge, and the state
//! mirror. Results are matched to callers only by correlation id, so calls
//! resolve in whatever order their results arrive.

use crate::mirror::StateMirror;
use crate::readiness::{ReadinessGate, ReadinessProbe, ReadinessState};
use async_trait::async_trait;
use dashmap::DashMap;
use ferry_types::broadcast::{BroadcastMessage, SliceSnapshot};
use ferry_types::config::FerryConfig;
use ferry_types::envelope::{CallEnvelope, CallOutcome, CorrelationId};
use ferry_types::error::FerryError;
use ferry_types::event::Event;
use ferry_types::module::{ModuleInterface, ModuleKey, SystemApi};
use ferry_wire::{BridgeOutlet, EventBridge, EventBus, Transport, WireError, WireMessage};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type CallReply = Result<CallOutcome, FerryError>;

struct PendingCall {
    /// Transport generation the call was sent on.
    generation: u64,
    tx: oneshot::Sender<CallReply>,
}

#[derive(Clone)]
struct Attached {
    transport: Arc<dyn Transport>,
    generation: u64,
}

/// The current transport, shared with the bridge outlet.
type Link = Arc<RwLock<Option<Attached>>>;

fn current(link: &Link) -> Option<Attached> {
    link.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Sends bridged events to whichever remote is attached.
struct ClientOutlet {
    link: Link,
}

#[async_trait]
impl BridgeOutlet for ClientOutlet {
    async fn forward(&self, msg: BroadcastMessage) -> Result<(), WireError> {
        match current(&self.link) {
            Some(attached) => attached.transport.send(msg.into()).await,
            None => Err(WireError::NotConnected("remote".into())),
        }
    }
}

/// A client context's connection to the remote context.
pub struct RemoteClient {
    name: String,
    config: FerryConfig,
    link: Link,
    generation: AtomicU64,
    pending: Arc<DashMap<CorrelationId, PendingCall>>,
    gate: ReadinessGate,
    events: Arc<EventBus>,
    bridge: Arc<EventBridge>,
    mirror: Arc<StateMirror>,
}

impl RemoteClient {
    /// Create a client with no transport attached yet.
    pub fn new(config: FerryConfig) -> Arc<Self> {
        let events = Arc::new(EventBus::with_history(config.event_history));
        let link: Link = Arc::new(RwLock::new(None));
        let bridge = EventBridge::start(
            Arc::clone(&events),
            Arc::new(ClientOutlet {
                link: Arc::clone(&link),
            }),
        );
        let gate = ReadinessGate::new(Arc::clone(&events), config.handshake_timeout());
        Arc::new(Self {
            name: config.client_name.clone(),
            config,
            link,
            generation: AtomicU64::new(0),
            pending: Arc::new(DashMap::new()),
            gate,
            events,
            bridge,
            mirror: Arc::new(StateMirror::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FerryConfig {
        &self.config
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Cached readiness of the remote.
    pub fn readiness(&self) -> ReadinessState {
        self.gate.state()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn mirror(&self) -> &Arc<StateMirror> {
        &self.mirror
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn is_attached(&self) -> bool {
        current(&self.link).is_some_and(|a| a.transport.is_connected())
    }

    /// Calls sent and not yet answered.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Attach a transport to the remote context, replacing any previous one.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> Result<(), FerryError> {
        let mut inbound = transport.take_inbound().ok_or_else(|| {
            FerryError::Transport(format!(
                "inbound stream of {} already taken",
                transport.peer_name()
            ))
        })?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.link.write().unwrap_or_else(|e| e.into_inner()) = Some(Attached {
            transport: Arc::clone(&transport),
            generation,
        });
        let stale = self.mirror.mark_stale();
        info!(client = %self.name, peer = transport.peer_name(), generation, stale, "Attached to remote");

        let link = Arc::clone(&self.link);
        let pending = Arc::clone(&self.pending);
        let mirror = Arc::clone(&self.mirror);
        let bridge = Arc::clone(&self.bridge);
        let gate = self.gate.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                match msg {
                    WireMessage::Result(result) => match pending.remove(&result.correlation_id) {
                        Some((_, call)) => {
                            let _ = call.tx.send(Ok(result.outcome));
                        }
                        None => {
                            debug!(
                                correlation_id = %result.correlation_id,
                                "Result for a call nobody is waiting on"
                            );
                        }
                    },
                    WireMessage::Broadcast(BroadcastMessage::StateSync { slice, value, rev }) => {
                        mirror.apply(&slice, value, rev);
                    }
                    WireMessage::Broadcast(msg @ BroadcastMessage::EventSync { .. }) => {
                        bridge.receive(msg).await;
                    }
                    WireMessage::Call(envelope) => {
                        warn!(
                            module = %envelope.module,
                            method = %envelope.method,
                            "Client contexts do not serve calls, ignoring"
                        );
                    }
                }
            }

            // The stream ended: the remote is gone for this generation.
            let still_current = {
                let mut slot = link.write().unwrap_or_else(|e| e.into_inner());
                let ours = slot.as_ref().is_some_and(|a| a.generation == generation);
                if ours {
                    *slot = None;
                }
                ours
            };
            if still_current {
                gate.mark_disconnected();
            }
            let orphaned = reject_generation(&pending, generation);
            info!(client = %name, generation, orphaned, "Remote connection closed");
        });
        Ok(())
    }

    /// Drop the current transport. Calls outstanding on it are rejected.
    pub fn detach(&self) {
        let detached = self
            .link
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(attached) = detached {
            self.gate.mark_disconnected();
            let orphaned = reject_generation(&self.pending, attached.generation);
            info!(client = %self.name, orphaned, "Detached from remote");
        }
    }

    /// Wait for the remote to become ready, handshaking if needed. A mirror
    /// left stale by a re-attach is refreshed before this returns.
    pub async fn wait_until_ready(self: &Arc<Self>) -> Result<(), FerryError> {
        let probe: Arc<dyn ReadinessProbe> = Arc::clone(self) as Arc<dyn ReadinessProbe>;
        self.gate.wait_until_ready(probe).await?;
        if self.mirror.take_stale() {
            self.refresh_mirror().await;
        }
        Ok(())
    }

    /// Replace the mirror with a full snapshot from the attached remote. On
    /// failure the mirror stays stale and the next ready call retries.
    async fn refresh_mirror(&self) {
        let envelope = CallEnvelope::new(
            SystemApi::key(),
            SystemApi::SNAPSHOT,
            vec![serde_json::json!([])],
        );
        let refreshed = match self.send_call(envelope).await {
            Ok(CallOutcome::Ok(value)) => parse_snapshot(value),
            Ok(CallOutcome::Err(failure)) => Err(FerryError::from_remote(
                &SystemApi::key(),
                SystemApi::SNAPSHOT,
                failure,
            )),
            Err(e) => Err(e),
        };
        match refreshed {
            Ok(snapshot) => {
                let applied = self.mirror.replace_with_snapshot(snapshot);
                info!(client = %self.name, applied, "Mirror refreshed from new remote");
            }
            Err(e) => {
                self.mirror.mark_stale();
                warn!(client = %self.name, error = %e, "Mirror refresh failed");
            }
        }
    }

    /// Call `module.method` on the remote context.
    pub async fn call(
        self: &Arc<Self>,
        module: &ModuleKey,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, FerryError> {
        self.wait_until_ready().await?;
        let envelope = CallEnvelope::new(module.clone(), method, params);
        match self.send_call(envelope).await? {
            CallOutcome::Ok(value) => Ok(value),
            CallOutcome::Err(failure) => Err(FerryError::from_remote(module, method, failure)),
        }
    }

    /// Send an envelope without consulting the readiness gate and wait for its
    /// result.
    pub async fn send_call(&self, envelope: CallEnvelope) -> Result<CallOutcome, FerryError> {
        let attached = current(&self.link)
            .ok_or_else(|| FerryError::Transport("not connected to the remote context".into()))?;

        let id = envelope.correlation_id.clone();
        let (tx, rx) = oneshot::channel();
        // Registered before sending so a fast result cannot arrive unclaimed.
        self.pending.insert(
            id.clone(),
            PendingCall {
                generation: attached.generation,
                tx,
            },
        );
        debug!(
            module = %envelope.module,
            method = %envelope.method,
            correlation_id = %id,
            "Sending call"
        );
        if let Err(e) = attached.transport.send(envelope.into()).await {
            self.pending.remove(&id);
            return Err(e.into());
        }

        rx.await
            .unwrap_or_else(|_| Err(FerryError::Transport("call abandoned".into())))
    }

    /// Ask the remote whether it is ready. A negative or failed probe resets
    /// a READY gate.
    pub async fn probe_remote(&self) -> Result<bool, FerryError> {
        let envelope = CallEnvelope::new(SystemApi::key(), SystemApi::IS_READY, vec![]);
        let result = match self.send_call(envelope).await {
            Ok(CallOutcome::Ok(Value::Bool(ready))) => Ok(ready),
            Ok(CallOutcome::Ok(other)) => {
                warn!(answer = %other, "Unexpected readiness answer");
                Ok(false)
            }
            Ok(CallOutcome::Err(failure)) => Err(FerryError::from_remote(
                &SystemApi::key(),
                SystemApi::IS_READY,
                failure,
            )),
            Err(e) => Err(e),
        };
        if !matches!(result, Ok(true)) {
            self.gate.mark_disconnected();
        }
        result
    }

    /// Pull the named slices (all slices if empty) into the mirror. Call this
    /// once after attaching, before relying on pushes.
    pub async fn bootstrap_state(self: &Arc<Self>, slices: &[&str]) -> Result<usize, FerryError> {
        let names: Vec<&str> = slices.to_vec();
        let value = self
            .call(&SystemApi::key(), SystemApi::SNAPSHOT, vec![serde_json::json!(names)])
            .await?;
        let applied = self.mirror.apply_snapshot(parse_snapshot(value)?);
        debug!(applied, "State bootstrap applied");
        Ok(applied)
    }

    /// Publish a locally originated event; it is bridged to the remote.
    pub async fn emit(&self, event_type: &str, payload: Value) {
        self.events.publish(Event::local(event_type, payload)).await;
    }
}

fn parse_snapshot(value: Value) -> Result<BTreeMap<String, SliceSnapshot>, FerryError> {
    serde_json::from_value(value).map_err(|e| FerryError::RemoteExecution {
        module: SystemApi::key(),
        method: SystemApi::SNAPSHOT.to_string(),
        origin: Some("InvalidResult".to_string()),
        message: e.to_string(),
    })
}

fn reject_generation(pending: &DashMap<CorrelationId, PendingCall>, generation: u64) -> usize {
    let ids: Vec<CorrelationId> = pending
        .iter()
        .filter(|e| e.value().generation == generation)
        .map(|e| e.key().clone())
        .collect();
    let mut rejected = 0;
    for id in ids {
        if let Some((_, call)) = pending.remove(&id) {
            let _ = call.tx.send(Err(FerryError::Transport(
                "connection to the remote context closed".into(),
            )));
            rejected += 1;
        }
    }
    rejected
}

#[async_trait]
impl ReadinessProbe for RemoteClient {
    async fn probe(&self) -> Result<bool, FerryError> {
        self.probe_remote().await
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.bridge.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::envelope::CallResult;
    use ferry_wire::MemoryTransport;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> FerryConfig {
        FerryConfig {
            handshake_timeout_ms: 200,
            ..FerryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_send_call_without_transport_fails_fast() {
        let client = RemoteClient::new(config());
        let err = client
            .send_call(CallEnvelope::new("m", "f", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::Transport(_)));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_results_routed_by_correlation_id() {
        let client = RemoteClient::new(config());
        let (client_end, remote_end) = MemoryTransport::pair("client", "remote");
        let mut remote_in = remote_end.take_inbound().unwrap();
        client.attach(Arc::new(client_end)).unwrap();

        let first = CallEnvelope::new("m", "slow", vec![]);
        let second = CallEnvelope::new("m", "fast", vec![]);
        let (first_id, second_id) = (first.correlation_id.clone(), second.correlation_id.clone());

        let c1 = Arc::clone(&client);
        let a = tokio::spawn(async move { c1.send_call(first).await });
        let c2 = Arc::clone(&client);
        let b = tokio::spawn(async move { c2.send_call(second).await });

        // Drain both envelopes, then answer in reverse order.
        remote_in.recv().await.unwrap();
        remote_in.recv().await.unwrap();
        remote_end
            .send(CallResult::ok(second_id, json!("fast")).into())
            .await
            .unwrap();
        remote_end
            .send(CallResult::ok(first_id, json!("slow")).into())
            .await
            .unwrap();

        assert_eq!(b.await.unwrap().unwrap(), CallOutcome::Ok(json!("fast")));
        assert_eq!(a.await.unwrap().unwrap(), CallOutcome::Ok(json!("slow")));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_stays_pending_until_answered() {
        let client = RemoteClient::new(config());
        let (client_end, remote_end) = MemoryTransport::pair("client", "remote");
        let mut remote_in = remote_end.take_inbound().unwrap();
        client.attach(Arc::new(client_end)).unwrap();

        let env = CallEnvelope::new("m", "f", vec![]);
        let id = env.correlation_id.clone();
        let mut call = tokio_test::task::spawn(client.send_call(env));
        tokio_test::assert_pending!(call.poll());

        remote_in.recv().await.unwrap();
        remote_end
            .send(CallResult::ok(id, json!(1)).into())
            .await
            .unwrap();
        // Let the inbound loop route the result.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(call.is_woken());
        let outcome = tokio_test::assert_ready!(call.poll()).unwrap();
        assert_eq!(outcome, CallOutcome::Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_disconnect_rejects_pending() {
        let client = RemoteClient::new(config());
        let (client_end, remote_end) = MemoryTransport::pair("client", "remote");
        let mut remote_in = remote_end.take_inbound().unwrap();
        client.attach(Arc::new(client_end)).unwrap();

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.send_call(CallEnvelope::new("m", "f", vec![])).await });
        remote_in.recv().await.unwrap();
        remote_end.disconnect();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, FerryError::Transport(_)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!client.is_attached());
    }

    #[tokio::test]
    async fn test_state_push_reaches_mirror() {
        let client = RemoteClient::new(config());
        let (client_end, remote_end) = MemoryTransport::pair("client", "remote");
        client.attach(Arc::new(client_end)).unwrap();
        let mut changes = client.mirror().subscribe();

        remote_end
            .send(
                BroadcastMessage::StateSync {
                    slice: "settings".into(),
                    value: json!({"theme": "dark"}),
                    rev: 2,
                }
                .into(),
            )
            .await
            .unwrap();
        let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.slice, "settings");
        assert_eq!(client.mirror().get("settings"), Some(json!({"theme": "dark"})));
    }
}
