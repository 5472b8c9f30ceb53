//! Modules served by `ferry serve` and `ferry demo`.

use async_trait::async_trait;
use ferry_kernel::{ModuleContext, ModuleError, ModuleTable, Params, RemoteModule, SliceDef};
use ferry_types::module::ModuleInterface;
use serde_json::{json, Value};
use std::time::Duration;

pub const SETTINGS_SLICE: &str = "settings";

fn default_settings() -> Value {
    json!({"theme": "light", "language": "en"})
}

/// Key-value settings backed by the `settings` state slice.
pub struct SettingsApi;

impl ModuleInterface for SettingsApi {
    const KEY: &'static str = "settings";
    const METHODS: &'static [&'static str] = &["get", "set", "reset"];
}

struct Settings {
    ctx: ModuleContext,
}

#[async_trait]
impl RemoteModule for Settings {
    async fn invoke(&self, method: &str, params: Params) -> Result<Value, ModuleError> {
        let state = &self.ctx.state;
        match method {
            "get" => {
                let all = state.get(SETTINGS_SLICE).await.unwrap_or(Value::Null);
                match params.opt_arg::<String>(0)? {
                    Some(key) => all
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| ModuleError::failed("NotFound", format!("no setting {key}"))),
                    None => Ok(all),
                }
            }
            "set" => {
                let key: String = params.arg(0)?;
                let value: Value = params.arg(1)?;
                let field = key.clone();
                let patch = value.clone();
                let rev = state
                    .update(SETTINGS_SLICE, move |current| {
                        let mut next = current.clone();
                        if let Some(map) = next.as_object_mut() {
                            map.insert(field, patch);
                        }
                        next
                    })
                    .await
                    .map_err(|e| ModuleError::Internal(e.to_string()))?;
                self.ctx
                    .emit("settings.changed", json!({"key": key, "value": value}))
                    .await;
                Ok(json!(rev))
            }
            "reset" => {
                let rev = state
                    .set(SETTINGS_SLICE, default_settings())
                    .await
                    .map_err(|e| ModuleError::Internal(e.to_string()))?;
                Ok(json!(rev))
            }
            other => Err(ModuleError::Internal(format!("unhandled method {other}"))),
        }
    }
}

/// Returns its arguments, optionally after a delay.
pub struct EchoApi;

impl ModuleInterface for EchoApi {
    const KEY: &'static str = "echo";
    const METHODS: &'static [&'static str] = &["echo", "delay"];
    const DEFERRED_RESOLVE: bool = true;
}

struct Echo;

#[async_trait]
impl RemoteModule for Echo {
    async fn invoke(&self, method: &str, params: Params) -> Result<Value, ModuleError> {
        match method {
            "echo" => Ok(Value::Array(params.0)),
            "delay" => {
                let ms: u64 = params.arg(0)?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(params.get(1).cloned().unwrap_or(Value::Null))
            }
            other => Err(ModuleError::Internal(format!("unhandled method {other}"))),
        }
    }
}

pub fn module_table() -> ModuleTable {
    ModuleTable::new()
        .register::<SettingsApi, _, _, _>(|ctx| async move { Ok(Settings { ctx }) })
        .register::<EchoApi, _, _, _>(|_ctx| async { Ok(Echo) })
}

pub fn slices() -> Vec<SliceDef> {
    vec![SliceDef::new(SETTINGS_SLICE, default_settings()).persisted()]
}
