//! Remote-owned state slices.
//!
//! The remote context is the only writer. Every write bumps the slice's
//! revision and queues a `StateSync` on the fan-out channel while the write
//! lock is still held, so pushes for one slice leave in the order they were
//! applied.

use crate::error::{KernelError, KernelResult};
use crate::storage::{storage_key, SliceStorage};
use ferry_types::broadcast::{BroadcastMessage, SliceSnapshot};
use ferry_types::error::FerryError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Revision every slice starts at. Revision 0 is reserved for unversioned
/// pushes, which mirrors apply unconditionally.
pub const INITIAL_REV: u64 = 1;

/// Declaration of one state slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceDef {
    pub name: String,
    pub initial: Value,
    /// Restore from and save to slice storage.
    pub persist: bool,
}

impl SliceDef {
    pub fn new(name: impl Into<String>, initial: Value) -> Self {
        Self {
            name: name.into(),
            initial,
            persist: false,
        }
    }

    pub fn persisted(mut self) -> Self {
        self.persist = true;
        self
    }
}

struct SliceEntry {
    value: Value,
    rev: u64,
    persist: bool,
}

/// The authoritative state slices of a remote context.
pub struct StateStore {
    slices: RwLock<HashMap<String, SliceEntry>>,
    fanout: mpsc::UnboundedSender<BroadcastMessage>,
    storage: Arc<dyn SliceStorage>,
}

/// Merge a restored value over a slice's initial value. Objects are merged one
/// level deep so fields added since the value was stored get their defaults.
pub fn restore_value(initial: &Value, stored: Option<Value>) -> Value {
    match (initial, stored) {
        (Value::Object(init), Some(Value::Object(stored))) => {
            let mut merged = init.clone();
            for (k, v) in stored {
                merged.insert(k, v);
            }
            Value::Object(merged)
        }
        (_, Some(stored)) => stored,
        (initial, None) => initial.clone(),
    }
}

impl StateStore {
    /// Build the store from slice declarations, restoring persisted slices.
    ///
    /// Returns the store and the receiving end of its fan-out queue.
    pub async fn init(
        defs: Vec<SliceDef>,
        storage: Arc<dyn SliceStorage>,
    ) -> KernelResult<(Arc<Self>, mpsc::UnboundedReceiver<BroadcastMessage>)> {
        let mut seen = HashSet::new();
        let mut slices = HashMap::with_capacity(defs.len());

        for def in defs {
            if def.name.trim().is_empty() {
                return Err(KernelError::BootFailed("slice name must not be empty".into()));
            }
            if !seen.insert(def.name.clone()) {
                return Err(KernelError::BootFailed(format!(
                    "duplicate slice name: {}",
                    def.name
                )));
            }

            let value = if def.persist {
                let key = storage_key(&def.name);
                let stored = storage.load(&key).await?;
                if stored.is_none() {
                    storage.save(&key, &def.initial).await?;
                }
                restore_value(&def.initial, stored)
            } else {
                def.initial
            };

            slices.insert(
                def.name,
                SliceEntry {
                    value,
                    rev: INITIAL_REV,
                    persist: def.persist,
                },
            );
        }

        info!(slices = slices.len(), "State store initialized");
        let (fanout, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            slices: RwLock::new(slices),
            fanout,
            storage,
        });
        Ok((store, rx))
    }

    fn unknown(slice: &str) -> FerryError {
        FerryError::Configuration(format!("Unknown state slice: {slice}"))
    }

    /// Replace a slice's value. Returns the new revision.
    pub async fn set(&self, slice: &str, value: Value) -> Result<u64, FerryError> {
        self.update(slice, |_| value).await
    }

    /// Compute a slice's next value from its current one. Returns the new
    /// revision.
    pub async fn update<F>(&self, slice: &str, f: F) -> Result<u64, FerryError>
    where
        F: FnOnce(&Value) -> Value,
    {
        let mut slices = self.slices.write().await;
        let entry = slices.get_mut(slice).ok_or_else(|| Self::unknown(slice))?;
        entry.value = f(&entry.value);
        entry.rev += 1;
        let rev = entry.rev;

        debug!(slice, rev, "State slice updated");
        let _ = self.fanout.send(BroadcastMessage::StateSync {
            slice: slice.to_string(),
            value: entry.value.clone(),
            rev,
        });

        if entry.persist {
            if let Err(e) = self.storage.save(&storage_key(slice), &entry.value).await {
                warn!(slice, error = %e, "Failed to persist state slice");
            }
        }
        Ok(rev)
    }

    /// Current value of a slice.
    pub async fn get(&self, slice: &str) -> Option<Value> {
        self.slices.read().await.get(slice).map(|e| e.value.clone())
    }

    /// Current revision of a slice.
    pub async fn rev(&self, slice: &str) -> Option<u64> {
        self.slices.read().await.get(slice).map(|e| e.rev)
    }

    /// Declared slice names, sorted.
    pub async fn slice_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slices.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Values and revisions of the named slices; an empty list means every
    /// slice.
    pub async fn snapshot(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, SliceSnapshot>, FerryError> {
        let slices = self.slices.read().await;
        let mut out = BTreeMap::new();
        if names.is_empty() {
            for (name, entry) in slices.iter() {
                out.insert(
                    name.clone(),
                    SliceSnapshot {
                        value: entry.value.clone(),
                        rev: entry.rev,
                    },
                );
            }
            return Ok(out);
        }
        for name in names {
            let entry = slices.get(name).ok_or_else(|| Self::unknown(name))?;
            out.insert(
                name.clone(),
                SliceSnapshot {
                    value: entry.value.clone(),
                    rev: entry.rev,
                },
            );
        }
        Ok(out)
    }
}
