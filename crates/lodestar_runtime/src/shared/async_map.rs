//! Asynchronous key/value maps.

use async_trait::async_trait;
use serde_json::Value;

use super::{LocalMap, SharedDataError};

/// An asynchronous key/value map.
///
/// Implemented by cluster providers for cluster-wide maps and by
/// [`LocalAsyncMap`] when the runtime is not clustered.
#[async_trait]
pub trait AsyncMap: Send + Sync {
    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, SharedDataError>;

    /// Stores `value` under `key`.
    async fn put(&self, key: &str, value: Value) -> Result<(), SharedDataError>;

    /// Stores `value` only if `key` is vacant, returning the existing value otherwise.
    async fn put_if_absent(&self, key: &str, value: Value) -> Result<Option<Value>, SharedDataError>;

    /// Removes `key` and returns its previous value.
    async fn remove(&self, key: &str) -> Result<Option<Value>, SharedDataError>;

    /// Returns all keys.
    async fn keys(&self) -> Result<Vec<String>, SharedDataError>;

    /// Returns the number of entries.
    async fn size(&self) -> Result<usize, SharedDataError>;

    /// Removes every entry.
    async fn clear(&self) -> Result<(), SharedDataError>;
}

/// [`AsyncMap`] backed by a process-local [`LocalMap`].
#[derive(Debug, Clone)]
pub struct LocalAsyncMap {
    map: LocalMap,
}

impl LocalAsyncMap {
    /// Wraps a local map.
    #[must_use]
    pub fn new(map: LocalMap) -> Self {
        Self { map }
    }
}

#[async_trait]
impl AsyncMap for LocalAsyncMap {
    async fn get(&self, key: &str) -> Result<Option<Value>, SharedDataError> {
        Ok(self.map.get(key))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), SharedDataError> {
        self.map.insert(key, value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Value) -> Result<Option<Value>, SharedDataError> {
        Ok(self.map.insert_if_absent(key, value))
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>, SharedDataError> {
        Ok(self.map.remove(key))
    }

    async fn keys(&self) -> Result<Vec<String>, SharedDataError> {
        Ok(self.map.keys())
    }

    async fn size(&self) -> Result<usize, SharedDataError> {
        Ok(self.map.len())
    }

    async fn clear(&self) -> Result<(), SharedDataError> {
        self.map.clear();
        Ok(())
    }
}
