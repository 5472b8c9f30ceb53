//! Persistence seam for state slices.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Key under which a slice is persisted.
pub fn storage_key(slice: &str) -> String {
    format!("ferry.state.{slice}")
}

/// Where persisted slices live between remote-context lifetimes.
#[async_trait]
pub trait SliceStorage: Send + Sync + 'static {
    async fn load(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn save(&self, key: &str, value: &Value) -> Result<(), StorageError>;
}

/// In-memory storage. Survives a remote context restart when shared.
#[derive(Default)]
pub struct MemorySliceStorage {
    entries: DashMap<String, Value>,
}

impl MemorySliceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }
}

#[async_trait]
impl SliceStorage for MemorySliceStorage {
    async fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}
