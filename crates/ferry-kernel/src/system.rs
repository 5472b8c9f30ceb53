//! The reserved `system` module every remote context serves.

use crate::module::{ModuleError, Params, RemoteModule};
use crate::state::StateStore;
use async_trait::async_trait;
use ferry_types::module::SystemApi;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers readiness probes and state bootstrap pulls.
pub struct SystemModule {
    ready: Arc<AtomicBool>,
    state: Arc<StateStore>,
}

impl SystemModule {
    pub fn new(ready: Arc<AtomicBool>, state: Arc<StateStore>) -> Self {
        Self { ready, state }
    }
}

#[async_trait]
impl RemoteModule for SystemModule {
    async fn invoke(&self, method: &str, params: Params) -> Result<Value, ModuleError> {
        match method {
            SystemApi::IS_READY => Ok(Value::Bool(self.ready.load(Ordering::SeqCst))),
            SystemApi::SNAPSHOT => {
                let names: Vec<String> = params.opt_arg(0)?.unwrap_or_default();
                let snapshot = self
                    .state
                    .snapshot(&names)
                    .await
                    .map_err(|e| ModuleError::failed("UnknownSlice", e.to_string()))?;
                serde_json::to_value(snapshot).map_err(|e| ModuleError::Internal(e.to_string()))
            }
            other => Err(ModuleError::Internal(format!("system.{other} is not implemented"))),
        }
    }
}
