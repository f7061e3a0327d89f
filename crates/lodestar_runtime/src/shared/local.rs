//! Process-local shared map.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde_json::Value;

/// A named, process-local key/value map.
///
/// Cloning a `LocalMap` yields another handle to the same storage. Values are
/// JSON values so that they can be moved into a cluster-backed map unchanged.
///
/// # Thread Safety
///
/// All operations take a short [`RwLock`] guard; no guard is ever held across
/// an `.await` point or returned to the caller.
#[derive(Clone)]
pub struct LocalMap {
    name: Arc<str>,
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl core::fmt::Debug for LocalMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalMap")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl LocalMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the map name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Stores `value` under `key` and returns the previous value.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.write().insert(key.into(), value)
    }

    /// Stores `value` only if `key` is vacant.
    ///
    /// Returns the existing value when the key was already present.
    pub fn insert_if_absent(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let mut entries = self.entries.write();
        let key = key.into();
        if let Some(existing) = entries.get(&key) {
            return Some(existing.clone());
        }
        entries.insert(key, value);
        None
    }

    /// Removes `key` and returns its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
