//! Error taxonomy surfaced to code calling into the remote context.

use crate::envelope::{FailureKind, RemoteFailure};
use crate::module::ModuleKey;
use thiserror::Error;

/// Top-level error type for ferry calls.
///
/// `Clone` so one handshake outcome can be handed to every waiter queued on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FerryError {
    /// A proxy was used on a host that does not support it. Raised locally,
    /// before any transport traffic.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The remote context never signalled readiness within the window.
    #[error("Remote context not ready after {timeout_ms}ms")]
    HandshakeTimeout {
        /// The handshake window that elapsed.
        timeout_ms: u64,
    },

    /// No factory is registered for this module key.
    #[error("Unknown module: {module}")]
    UnknownModule {
        /// The key that was requested.
        module: ModuleKey,
    },

    /// The module exists but has no such method.
    #[error("Unknown method: {module}.{method}")]
    UnknownMethod {
        /// The module that was called.
        module: ModuleKey,
        /// The method that does not exist.
        method: String,
    },

    /// The method body raised.
    #[error("Remote execution failed in {module}.{method}: {message}")]
    RemoteExecution {
        /// The module that was called.
        module: ModuleKey,
        /// The method that raised.
        method: String,
        /// Original error kind inside the remote context, if reported.
        origin: Option<String>,
        /// Original error message.
        message: String,
    },

    /// The channel to the remote context is unavailable or closed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl FerryError {
    /// Rebuild a local error from a structured failure returned by the remote
    /// registry for a call to `module.method`.
    pub fn from_remote(module: &ModuleKey, method: &str, failure: RemoteFailure) -> Self {
        match failure.kind {
            FailureKind::UnknownModule => FerryError::UnknownModule {
                module: module.clone(),
            },
            FailureKind::UnknownMethod => FerryError::UnknownMethod {
                module: module.clone(),
                method: method.to_string(),
            },
            FailureKind::RemoteExecution => FerryError::RemoteExecution {
                module: module.clone(),
                method: method.to_string(),
                origin: failure.origin,
                message: failure.message,
            },
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FerryError::HandshakeTimeout { .. } | FerryError::Transport(_)
        )
    }
}

/// Alias for Result with FerryError.
pub type FerryResult<T> = Result<T, FerryError>;
