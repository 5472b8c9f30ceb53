//! Module registry: the registration table and lazy, memoized singletons.
//!
//! Modules are registered up front as `ModuleKey -> factory` together with the
//! method names their interface declares. An instance is constructed on the
//! first dispatch to its key; concurrent first dispatches share one in-flight
//! construction through a per-key `OnceCell`.

use crate::module::{ModuleContext, ModuleError, ModuleFactory, Params, RemoteModule};
use dashmap::DashMap;
use ferry_types::envelope::{CallEnvelope, CallResult, RemoteFailure};
use ferry_types::module::{ModuleInterface, ModuleKey};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Failure origin reported when a module factory fails.
pub const ORIGIN_MODULE_INIT: &str = "ModuleInit";
/// Failure origin reported when a module method panics.
pub const ORIGIN_PANIC: &str = "Panic";

#[derive(Clone)]
struct Registration {
    methods: Vec<String>,
    factory: ModuleFactory,
}

/// The startup registration table.
#[derive(Default, Clone)]
pub struct ModuleTable {
    entries: HashMap<ModuleKey, Registration>,
    duplicates: Vec<ModuleKey>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for the module declared by `M`.
    pub fn register<M, F, Fut, T>(self, factory: F) -> Self
    where
        M: ModuleInterface,
        F: Fn(ModuleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ModuleError>> + Send + 'static,
        T: RemoteModule,
    {
        let methods = M::METHODS.iter().map(|m| m.to_string()).collect();
        let factory: ModuleFactory = Arc::new(move |ctx| {
            let fut = factory(ctx);
            async move { fut.await.map(|m| Arc::new(m) as Arc<dyn RemoteModule>) }.boxed()
        });
        self.register_dyn(M::key(), methods, factory)
    }

    /// Register a factory under an explicit key and method list.
    pub fn register_dyn(
        mut self,
        key: ModuleKey,
        methods: Vec<String>,
        factory: ModuleFactory,
    ) -> Self {
        if self.entries.contains_key(&key) {
            self.duplicates.push(key);
            return self;
        }
        self.entries.insert(key, Registration { methods, factory });
        self
    }

    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys that were registered more than once.
    pub fn duplicates(&self) -> &[ModuleKey] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dispatches call envelopes to lazily constructed module singletons.
pub struct ModuleRegistry {
    table: HashMap<ModuleKey, Registration>,
    instances: DashMap<ModuleKey, Arc<OnceCell<Arc<dyn RemoteModule>>>>,
    ctx: ModuleContext,
    constructed: AtomicU64,
}

impl ModuleRegistry {
    /// Build a registry from a table. Nothing is constructed yet.
    pub fn new(table: ModuleTable, ctx: ModuleContext) -> Self {
        info!(modules = table.entries.len(), "Module registry ready");
        Self {
            table: table.entries,
            instances: DashMap::new(),
            ctx,
            constructed: AtomicU64::new(0),
        }
    }

    /// Whether a factory is registered for `key`.
    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.table.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<ModuleKey> {
        let mut keys: Vec<ModuleKey> = self.table.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Declared methods of a module.
    pub fn methods(&self, key: &ModuleKey) -> Option<&[String]> {
        self.table.get(key).map(|r| r.methods.as_slice())
    }

    /// The keys in `keys` that have no registered factory.
    pub fn missing<'a, I>(&self, keys: I) -> Vec<ModuleKey>
    where
        I: IntoIterator<Item = &'a ModuleKey>,
    {
        keys.into_iter()
            .filter(|k| !self.table.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Number of modules that currently hold a constructed instance.
    pub fn instance_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|e| e.value().initialized())
            .count()
    }

    /// Total number of successful constructions.
    pub fn constructed_count(&self) -> u64 {
        self.constructed.load(Ordering::Relaxed)
    }

    /// Resolve (constructing if needed) the instance for `key`.
    async fn instance(
        &self,
        key: &ModuleKey,
        registration: &Registration,
    ) -> Result<Arc<dyn RemoteModule>, RemoteFailure> {
        let cell = self
            .instances
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                debug!(module = %key, "Constructing module");
                // The factory call itself may panic before any future exists.
                let ctx = self.ctx.clone();
                let built = AssertUnwindSafe(async { (registration.factory)(ctx).await })
                    .catch_unwind()
                    .await;
                match built {
                    Ok(Ok(instance)) => {
                        self.constructed.fetch_add(1, Ordering::Relaxed);
                        info!(module = %key, "Module constructed");
                        Ok(instance)
                    }
                    Ok(Err(e)) => {
                        warn!(module = %key, error = %e, "Module construction failed");
                        Err(RemoteFailure::execution(ORIGIN_MODULE_INIT, e.to_string()))
                    }
                    Err(_) => {
                        warn!(module = %key, "Module factory panicked");
                        Err(RemoteFailure::execution(
                            ORIGIN_MODULE_INIT,
                            format!("Module {key} panicked during construction"),
                        ))
                    }
                }
            })
            .await;
        result.map(Arc::clone)
    }

    /// Dispatch one envelope. Always produces a result carrying the
    /// envelope's correlation id.
    pub async fn dispatch(&self, envelope: CallEnvelope) -> CallResult {
        let CallEnvelope {
            module,
            method,
            params,
            correlation_id,
        } = envelope;

        let Some(registration) = self.table.get(&module) else {
            debug!(module = %module, "Call for unknown module");
            return CallResult::err(correlation_id, RemoteFailure::unknown_module(&module));
        };

        if !registration.methods.iter().any(|m| m == &method) {
            debug!(module = %module, method = %method, "Call for unknown method");
            return CallResult::err(
                correlation_id,
                RemoteFailure::unknown_method(&module, &method),
            );
        }

        let instance = match self.instance(&module, registration).await {
            Ok(instance) => instance,
            Err(failure) => return CallResult::err(correlation_id, failure),
        };

        debug!(module = %module, method = %method, %correlation_id, "Dispatching call");
        let outcome = AssertUnwindSafe(async { instance.invoke(&method, Params(params)).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => CallResult::ok(correlation_id, value),
            Ok(Err(e)) => {
                debug!(module = %module, method = %method, error = %e, "Module method failed");
                CallResult::err(correlation_id, RemoteFailure::execution(e.kind(), e.to_string()))
            }
            Err(_) => {
                warn!(module = %module, method = %method, "Module method panicked");
                CallResult::err(
                    correlation_id,
                    RemoteFailure::execution(
                        ORIGIN_PANIC,
                        format!("{module}.{method} panicked"),
                    ),
                )
            }
        }
    }
}
