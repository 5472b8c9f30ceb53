//! Call envelopes and call results.
//!
//! One [`CallEnvelope`] is created per remote invocation. The remote side
//! answers with exactly one [`CallResult`] carrying the same correlation id,
//! which is the only thing that routes a response back to its waiter.

use crate::module::ModuleKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque token pairing a call with its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single remote invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    /// Target module.
    pub module: ModuleKey,
    /// Method name on the module's public interface.
    pub method: String,
    /// Positional, serializable arguments.
    pub params: Vec<Value>,
    /// Unique among concurrently outstanding calls.
    pub correlation_id: CorrelationId,
}

impl CallEnvelope {
    /// Build an envelope with a fresh correlation id.
    pub fn new(module: impl Into<ModuleKey>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            params,
            correlation_id: CorrelationId::new(),
        }
    }
}

/// Structured failure categories that can cross the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    UnknownModule,
    UnknownMethod,
    RemoteExecution,
}

/// A structured failure produced by the remote registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Original error kind raised inside the module (e.g. `InvalidParams`,
    /// `Panic`, `ModuleInit`), when `kind` is `RemoteExecution`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl RemoteFailure {
    pub fn unknown_module(module: &ModuleKey) -> Self {
        Self {
            kind: FailureKind::UnknownModule,
            message: format!("Unknown module: {module}"),
            origin: None,
        }
    }

    pub fn unknown_method(module: &ModuleKey, method: &str) -> Self {
        Self {
            kind: FailureKind::UnknownMethod,
            message: format!("Unknown method: {module}.{method}"),
            origin: None,
        }
    }

    pub fn execution(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::RemoteExecution,
            message: message.into(),
            origin: Some(origin.into()),
        }
    }
}

/// Outcome of a call: `{ "ok": value }` or `{ "err": { kind, message } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Ok(Value),
    Err(RemoteFailure),
}

/// The response to one [`CallEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub correlation_id: CorrelationId,
    pub outcome: CallOutcome,
}

impl CallResult {
    pub fn ok(correlation_id: CorrelationId, value: Value) -> Self {
        Self {
            correlation_id,
            outcome: CallOutcome::Ok(value),
        }
    }

    pub fn err(correlation_id: CorrelationId, failure: RemoteFailure) -> Self {
        Self {
            correlation_id,
            outcome: CallOutcome::Err(failure),
        }
    }
}
