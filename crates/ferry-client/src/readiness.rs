//! Readiness gate: "is the remote context usable", negotiated once and cached.
//!
//! ```text
//! UNINITIALIZED --(call)--> INITIALIZING --(signal within timeout)--> READY
//! INITIALIZING --(timeout)--> FAILED --(call)--> INITIALIZING
//! READY --(disconnect / probe failure)--> UNINITIALIZED
//! ```
//!
//! At most one handshake runs at a time. Callers arriving while one is in
//! flight queue on it and share its outcome.

use async_trait::async_trait;
use ferry_types::error::FerryError;
use ferry_types::event::{names, Event};
use ferry_wire::EventBus;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Cached readiness of the remote context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Asks the remote context whether it accepts calls (`system.isReady`).
#[async_trait]
pub trait ReadinessProbe: Send + Sync + 'static {
    async fn probe(&self) -> Result<bool, FerryError>;
}

type Waiter = oneshot::Sender<Result<(), FerryError>>;

struct GateInner {
    state: ReadinessState,
    waiters: Vec<Waiter>,
    /// Incremented per handshake so a stale attempt cannot settle a newer one.
    attempt: u64,
    last_failed: bool,
}

/// One client's readiness gate. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReadinessGate {
    inner: Arc<Mutex<GateInner>>,
    events: Arc<EventBus>,
    timeout: Duration,
    wakes: Arc<AtomicU64>,
}

impl ReadinessGate {
    /// A gate that signals over `events` and gives each handshake `timeout`.
    pub fn new(events: Arc<EventBus>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateInner {
                state: ReadinessState::Uninitialized,
                waiters: Vec::new(),
                attempt: 0,
                last_failed: false,
            })),
            events,
            timeout,
            wakes: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached state.
    pub fn state(&self) -> ReadinessState {
        self.lock().state
    }

    /// `true` only if the last handshake succeeded and no disconnect has been
    /// observed since.
    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }

    /// Whether the most recent handshake timed out.
    pub fn last_handshake_failed(&self) -> bool {
        self.lock().last_failed
    }

    /// Number of wake signals this gate has emitted.
    pub fn wake_signals(&self) -> u64 {
        self.wakes.load(Ordering::SeqCst)
    }

    /// The handshake window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve once the remote context is ready, starting a handshake if none
    /// is in flight.
    pub async fn wait_until_ready(&self, probe: Arc<dyn ReadinessProbe>) -> Result<(), FerryError> {
        let (rx, start) = {
            let mut inner = self.lock();
            match inner.state {
                ReadinessState::Ready => return Ok(()),
                ReadinessState::Initializing => {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push(tx);
                    (rx, None)
                }
                ReadinessState::Uninitialized | ReadinessState::Failed => {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push(tx);
                    inner.state = ReadinessState::Initializing;
                    inner.attempt += 1;
                    (rx, Some(inner.attempt))
                }
            }
        };

        if let Some(attempt) = start {
            debug!(attempt, "Starting readiness handshake");
            let gate = self.clone();
            tokio::spawn(async move {
                let ok = gate.handshake(probe).await;
                gate.settle(attempt, ok);
            });
        }

        rx.await
            .unwrap_or_else(|_| Err(FerryError::Transport("readiness handshake abandoned".into())))
    }

    /// Probe first; if the remote is not ready, wake it and wait for the
    /// initialized signal. The whole exchange is bounded by the timeout.
    async fn handshake(&self, probe: Arc<dyn ReadinessProbe>) -> bool {
        // Listen before probing so a signal arriving mid-probe is not lost.
        let initialized = self.events.once(names::REMOTE_INITIALIZED);

        let exchange = async {
            tokio::pin!(initialized);
            tokio::select! {
                _ = &mut initialized => return,
                probed = probe.probe() => match probed {
                    Ok(true) => return,
                    Ok(false) => debug!("Remote not ready, waking it"),
                    Err(e) => debug!(error = %e, "Remote unreachable, waking it"),
                },
            }
            self.wakes.fetch_add(1, Ordering::SeqCst);
            self.events
                .publish(Event::local(names::WAKE_REMOTE, Value::Null))
                .await;
            let _ = initialized.await;
        };

        tokio::time::timeout(self.timeout, exchange).await.is_ok()
    }

    fn settle(&self, attempt: u64, ok: bool) {
        let waiters = {
            let mut inner = self.lock();
            if inner.attempt != attempt || inner.state != ReadinessState::Initializing {
                return;
            }
            inner.state = if ok {
                ReadinessState::Ready
            } else {
                ReadinessState::Failed
            };
            inner.last_failed = !ok;
            std::mem::take(&mut inner.waiters)
        };

        if ok {
            info!(waiters = waiters.len(), "Remote context ready");
        } else {
            warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                waiters = waiters.len(),
                "Readiness handshake timed out"
            );
        }
        let outcome = if ok {
            Ok(())
        } else {
            Err(FerryError::HandshakeTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Record a disconnect or failed probe. A READY gate re-handshakes on the
    /// next call.
    pub fn mark_disconnected(&self) {
        let mut inner = self.lock();
        if inner.state == ReadinessState::Ready {
            info!("Remote context lost, readiness reset");
            inner.state = ReadinessState::Uninitialized;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Answers with a fixed value and counts how often it was asked.
    struct FixedProbe {
        ready: AtomicBool,
        calls: AtomicU64,
    }

    impl FixedProbe {
        fn new(ready: bool) -> Arc<Self> {
            Arc::new(Self {
                ready: AtomicBool::new(ready),
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl ReadinessProbe for FixedProbe {
        async fn probe(&self) -> Result<bool, FerryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.ready.load(Ordering::SeqCst))
        }
    }

    /// Answers every wake with the initialized signal, like a live remote.
    fn answer_wakes(events: Arc<EventBus>) {
        let mut rx = events.subscribe_type(names::WAKE_REMOTE);
        tokio::spawn(async move {
            while rx.recv().await.is_ok() {
                events
                    .publish(Event::with_hops(names::REMOTE_INITIALIZED, Value::Null, 1))
                    .await;
            }
        });
    }

    #[tokio::test]
    async fn test_ready_probe_skips_wake() {
        let events = Arc::new(EventBus::new());
        let gate = ReadinessGate::new(events, Duration::from_secs(1));
        gate.wait_until_ready(FixedProbe::new(true)).await.unwrap();
        assert_eq!(gate.state(), ReadinessState::Ready);
        assert_eq!(gate.wake_signals(), 0);
    }

    #[tokio::test]
    async fn test_unready_probe_wakes_once() {
        let events = Arc::new(EventBus::new());
        answer_wakes(Arc::clone(&events));
        let gate = ReadinessGate::new(events, Duration::from_secs(1));
        let probe = FixedProbe::new(false);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let probe: Arc<dyn ReadinessProbe> = probe.clone();
            handles.push(tokio::spawn(async move { gate.wait_until_ready(probe).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(gate.wake_signals(), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_then_retry() {
        let events = Arc::new(EventBus::new());
        let gate = ReadinessGate::new(Arc::clone(&events), Duration::from_millis(50));

        let err = gate.wait_until_ready(FixedProbe::new(false)).await.unwrap_err();
        assert_eq!(err, FerryError::HandshakeTimeout { timeout_ms: 50 });
        assert_eq!(gate.state(), ReadinessState::Failed);
        assert!(gate.last_handshake_failed());

        // A fresh handshake starts and can succeed.
        answer_wakes(events);
        gate.wait_until_ready(FixedProbe::new(false)).await.unwrap();
        assert_eq!(gate.state(), ReadinessState::Ready);
        assert!(!gate.last_handshake_failed());
        assert_eq!(gate.wake_signals(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_resets_ready() {
        let events = Arc::new(EventBus::new());
        let gate = ReadinessGate::new(events, Duration::from_secs(1));
        gate.wait_until_ready(FixedProbe::new(true)).await.unwrap();
        gate.mark_disconnected();
        assert_eq!(gate.state(), ReadinessState::Uninitialized);

        // Not ready and not failed: disconnect leaves other states alone.
        gate.mark_disconnected();
        assert_eq!(gate.state(), ReadinessState::Uninitialized);
    }

    #[tokio::test]
    async fn test_ready_is_sticky_without_disconnect() {
        let events = Arc::new(EventBus::new());
        let gate = ReadinessGate::new(events, Duration::from_secs(1));
        let probe = FixedProbe::new(true);
        for _ in 0..3 {
            gate.wait_until_ready(probe.clone()).await.unwrap();
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }
}
