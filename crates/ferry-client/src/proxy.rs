//! Module proxies: call-forwarding handles for remote modules.
//!
//! A [`ProxyFactory`] hands out one [`ModuleProxy`] per module key and keeps
//! it for its own lifetime, so a long-lived reference keeps working across
//! remote restarts. Readiness is checked on every call, never cached in the
//! proxy.

use crate::connection::RemoteClient;
use dashmap::DashMap;
use ferry_types::error::FerryError;
use ferry_types::host::HostPlatform;
use ferry_types::module::{ModuleInterface, ModuleKey};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-proxy capabilities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyOptions {
    /// Hosts the proxy may be used on. Empty means every host.
    pub hosts: Vec<HostPlatform>,
    /// Whether [`ModuleProxy::resolve`] is available.
    pub deferred_resolve: bool,
    /// Methods the proxy may dispatch. `None` lets the remote registry decide.
    pub methods: Option<Vec<String>>,
}

impl ProxyOptions {
    /// The options a typed interface declares.
    pub fn of<M: ModuleInterface>() -> Self {
        Self {
            hosts: M::HOSTS.to_vec(),
            deferred_resolve: M::DEFERRED_RESOLVE,
            methods: Some(M::METHODS.iter().map(|m| m.to_string()).collect()),
        }
    }

    pub fn hosts(mut self, hosts: &[HostPlatform]) -> Self {
        self.hosts = hosts.to_vec();
        self
    }

    pub fn deferred_resolve(mut self) -> Self {
        self.deferred_resolve = true;
        self
    }
}

/// Forwards method calls to one module in the remote context.
pub struct ModuleProxy {
    key: ModuleKey,
    options: ProxyOptions,
    host: HostPlatform,
    client: Arc<RemoteClient>,
}

impl std::fmt::Debug for ModuleProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleProxy")
            .field("key", &self.key)
            .field("host", &self.host)
            .field("options", &self.options)
            .finish()
    }
}

impl ModuleProxy {
    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Fail if this proxy may not be used on the current host. Runs before
    /// any transport traffic.
    pub fn check_env(&self) -> Result<(), FerryError> {
        if self.options.hosts.is_empty() || self.options.hosts.contains(&self.host) {
            return Ok(());
        }
        let allowed: Vec<&str> = self.options.hosts.iter().map(|h| h.as_str()).collect();
        Err(FerryError::Configuration(format!(
            "module {} is not available on {} (only on {})",
            self.key,
            self.host,
            allowed.join(", ")
        )))
    }

    fn check_method(&self, method: &str) -> Result<(), FerryError> {
        match &self.options.methods {
            Some(methods) if !methods.iter().any(|m| m == method) => {
                Err(FerryError::UnknownMethod {
                    module: self.key.clone(),
                    method: method.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Call a method and return its raw result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, FerryError> {
        self.check_env()?;
        self.check_method(method)?;
        self.client.call(&self.key, method, params).await
    }

    /// Call a method and deserialize its result.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, FerryError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| FerryError::RemoteExecution {
            module: self.key.clone(),
            method: method.to_string(),
            origin: Some("InvalidResult".to_string()),
            message: e.to_string(),
        })
    }

    /// Wait for the remote to be ready and hand back this proxy.
    ///
    /// For call sites that resolve a module reference before using it. Only
    /// available on proxies created with the deferred-resolve capability; the
    /// proxy itself is never a future.
    pub async fn resolve(self: &Arc<Self>) -> Result<Arc<ModuleProxy>, FerryError> {
        if !self.options.deferred_resolve {
            return Err(FerryError::Configuration(format!(
                "module {} does not support deferred resolution",
                self.key
            )));
        }
        self.check_env()?;
        self.client.wait_until_ready().await?;
        Ok(Arc::clone(self))
    }
}

/// Builds and memoizes module proxies over one [`RemoteClient`].
pub struct ProxyFactory {
    client: Arc<RemoteClient>,
    host: HostPlatform,
    proxies: DashMap<ModuleKey, Arc<ModuleProxy>>,
}

impl ProxyFactory {
    /// Proxies for `client`, checking hosts against the client's configured
    /// host platform.
    pub fn new(client: Arc<RemoteClient>) -> Self {
        let host = client.config().host;
        Self::for_host(client, host)
    }

    pub fn for_host(client: Arc<RemoteClient>, host: HostPlatform) -> Self {
        Self {
            client,
            host,
            proxies: DashMap::new(),
        }
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    /// The proxy for a typed module interface. Its declared hosts and methods
    /// always apply: an untyped proxy cached earlier for the same key with
    /// other options is replaced.
    pub fn proxy<M: ModuleInterface>(&self) -> Arc<ModuleProxy> {
        let options = ProxyOptions::of::<M>();
        let mut entry = self
            .proxies
            .entry(M::key())
            .or_insert_with(|| self.build(M::key(), options.clone()));
        if entry.options != options {
            warn!(module = M::KEY, "Replacing untyped proxy with the interface's options");
            *entry.value_mut() = self.build(M::key(), options);
        }
        Arc::clone(entry.value())
    }

    /// The proxy for `key`. The first request for a key fixes its options;
    /// later requests return the same proxy.
    pub fn proxy_for(&self, key: impl Into<ModuleKey>, options: ProxyOptions) -> Arc<ModuleProxy> {
        let key = key.into();
        let entry = self
            .proxies
            .entry(key.clone())
            .or_insert_with(|| self.build(key, options));
        Arc::clone(entry.value())
    }

    fn build(&self, key: ModuleKey, options: ProxyOptions) -> Arc<ModuleProxy> {
        debug!(module = %key, "Creating module proxy");
        Arc::new(ModuleProxy {
            key,
            options,
            host: self.host,
            client: Arc::clone(&self.client),
        })
    }

    /// Keys of every proxy handed out so far.
    pub fn keys(&self) -> Vec<ModuleKey> {
        let mut keys: Vec<ModuleKey> = self.proxies.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
