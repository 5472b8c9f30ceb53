//! The module seam: what a remote singleton looks like to the registry.

use crate::state::StateStore;
use async_trait::async_trait;
use ferry_types::event::Event;
use ferry_wire::EventBus;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by module code. Converted at the registry boundary into a
/// structured failure; nothing but the kind and message crosses the wire.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// The caller passed arguments the method cannot use.
    #[error("{0}")]
    InvalidParams(String),

    /// A domain failure with its own kind name (e.g. `NotFound`, `Locked`).
    #[error("{message}")]
    Failed { kind: String, message: String },

    /// Anything else that went wrong inside the module.
    #[error("{0}")]
    Internal(String),
}

impl ModuleError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ModuleError::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Name of the original error kind, reported as the failure origin.
    pub fn kind(&self) -> &str {
        match self {
            ModuleError::InvalidParams(_) => "InvalidParams",
            ModuleError::Failed { kind, .. } => kind,
            ModuleError::Internal(_) => "Internal",
        }
    }
}

impl From<crate::error::KernelError> for ModuleError {
    fn from(e: crate::error::KernelError) -> Self {
        ModuleError::Internal(e.to_string())
    }
}

/// Positional call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(pub Vec<Value>);

impl Params {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Required argument at `index`, deserialized.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, ModuleError> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| ModuleError::InvalidParams(format!("missing argument {index}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ModuleError::InvalidParams(format!("argument {index}: {e}")))
    }

    /// Optional argument at `index`; absent and `null` both yield `None`.
    pub fn opt_arg<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, ModuleError> {
        match self.0.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.arg(index).map(Some),
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params(values)
    }
}

/// A module singleton living in the remote context.
///
/// `invoke` is only called with method names the module was registered with.
#[async_trait]
pub trait RemoteModule: Send + Sync + 'static {
    async fn invoke(&self, method: &str, params: Params) -> Result<Value, ModuleError>;
}

/// What a module factory gets to work with.
#[derive(Clone)]
pub struct ModuleContext {
    /// The remote-owned state store. Writes fan out to every client.
    pub state: Arc<StateStore>,
    /// The remote context's local event bus.
    pub events: Arc<EventBus>,
}

impl ModuleContext {
    /// Publish a locally originated event; the bridge forwards it to clients.
    pub async fn emit(&self, event_type: &str, payload: Value) {
        self.events.publish(Event::local(event_type, payload)).await;
    }
}

/// Constructs a module instance. Called at most once per successful
/// construction; a failed construction is retried on the next dispatch.
pub type ModuleFactory = Arc<
    dyn Fn(ModuleContext) -> BoxFuture<'static, Result<Arc<dyn RemoteModule>, ModuleError>>
        + Send
        + Sync,
>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_arg() {
        let params = Params(vec![json!("dark"), json!(3)]);
        assert_eq!(params.arg::<String>(0).unwrap(), "dark");
        assert_eq!(params.arg::<u32>(1).unwrap(), 3);
    }

    #[test]
    fn test_params_missing_and_mistyped() {
        let params = Params(vec![json!("dark")]);
        let err = params.arg::<String>(1).unwrap_err();
        assert_eq!(err.kind(), "InvalidParams");
        assert!(err.to_string().contains("missing argument 1"));

        let err = params.arg::<u32>(0).unwrap_err();
        assert!(err.to_string().starts_with("argument 0"));
    }

    #[test]
    fn test_params_opt_arg() {
        let params = Params(vec![json!(null)]);
        assert_eq!(params.opt_arg::<u32>(0).unwrap(), None);
        assert_eq!(params.opt_arg::<u32>(5).unwrap(), None);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ModuleError::failed("Locked", "vault locked").kind(), "Locked");
        assert_eq!(ModuleError::Internal("x".into()).kind(), "Internal");
    }
}
