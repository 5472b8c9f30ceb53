//! Ferry client context.
//!
//! A client context never runs module code itself. It calls into the remote
//! context through proxies, waits for the remote to become reachable through a
//! bounded readiness handshake, and keeps a read-only mirror of the state
//! slices the remote owns.

pub mod connection;
pub mod launcher;
pub mod mirror;
pub mod proxy;
pub mod readiness;

pub use connection::RemoteClient;
pub use launcher::{spawn_wake_listener, RemoteLauncher};
pub use mirror::{SliceChange, StateMirror};
pub use proxy::{ModuleProxy, ProxyFactory, ProxyOptions};
pub use readiness::{ReadinessGate, ReadinessProbe, ReadinessState};
