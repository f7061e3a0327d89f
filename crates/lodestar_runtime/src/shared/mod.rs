//! Shared data structures.
//!
//! Every runtime handle owns a [`SharedData`] accessor with two kinds of maps:
//!
//! | Map | Access | Scope |
//! |-----|--------|-------|
//! | [`LocalMap`] | Synchronous | Process-local, content never leaves the process |
//! | [`AsyncMap`] | Asynchronous | Cluster-wide when clustered, local otherwise |
//!
//! Callers never branch on clustering mode: when no cluster manager is
//! configured, [`SharedData::async_map`] resolves to a [`LocalAsyncMap`] with
//! the same interface.
//!
//! # Example
//!
//! ```
//! use lodestar_runtime::runtime::{Runtime, RuntimeOptions};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handle = Runtime::standalone(RuntimeOptions::default());
//!
//! let local = handle.shared_data().local_map("cache");
//! local.insert("answer", json!(42));
//!
//! let shared = handle.shared_data().async_map("cache").await.unwrap();
//! shared.put("answer", json!(42)).await.unwrap();
//! assert_eq!(shared.get("answer").await.unwrap(), Some(json!(42)));
//! # }
//! ```

mod async_map;
mod local;

pub use async_map::{AsyncMap, LocalAsyncMap};
pub use local::LocalMap;

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::cluster::{ClusterError, ClusterManager};

/// Errors raised by shared data access.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SharedDataError {
    /// The backing cluster rejected the operation.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The runtime owning the data has been closed.
    #[error("shared data is no longer available, the runtime is closed")]
    Closed,
}

/// Accessor for local and asynchronous shared maps of one runtime handle.
pub struct SharedData {
    local_maps: RwLock<HashMap<String, LocalMap>>,
    local_async_maps: RwLock<HashMap<String, Arc<LocalAsyncMap>>>,
    cluster: Option<Arc<dyn ClusterManager>>,
}

impl core::fmt::Debug for SharedData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedData")
            .field("local_maps", &self.local_maps.read().len())
            .field("clustered", &self.cluster.is_some())
            .finish()
    }
}

impl SharedData {
    /// Creates an accessor. Async maps come from `cluster` when present.
    #[must_use]
    pub fn new(cluster: Option<Arc<dyn ClusterManager>>) -> Self {
        Self {
            local_maps: RwLock::new(HashMap::new()),
            local_async_maps: RwLock::new(HashMap::new()),
            cluster,
        }
    }

    /// Returns the local map with the given name, creating it on first use.
    ///
    /// The same name always yields the same map for this accessor.
    #[must_use]
    pub fn local_map(&self, name: &str) -> LocalMap {
        if let Some(map) = self.local_maps.read().get(name) {
            return map.clone();
        }
        self.local_maps
            .write()
            .entry(name.to_string())
            .or_insert_with(|| LocalMap::new(name))
            .clone()
    }

    /// Resolves the asynchronous map with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`SharedDataError::Cluster`] if the cluster manager cannot
    /// provide the map (for example because the node already left the cluster).
    pub async fn async_map(&self, name: &str) -> Result<Arc<dyn AsyncMap>, SharedDataError> {
        if let Some(cluster) = &self.cluster {
            return Ok(cluster.async_map(name).await?);
        }

        let map = self
            .local_async_maps
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalAsyncMap::new(LocalMap::new(name))))
            .clone();
        Ok(map)
    }

    /// Returns true if async maps are cluster-backed.
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        self.cluster.is_some()
    }

    /// Returns the names of all local maps created so far.
    #[must_use]
    pub fn local_map_names(&self) -> Vec<String> {
        self.local_maps.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterBind, InMemoryCluster};
    use serde_json::json;

    #[test]
    fn local_map_is_stable_per_name() {
        let shared = SharedData::new(None);
        let first = shared.local_map("a");
        first.insert("k", json!(1));

        let second = shared.local_map("a");
        assert_eq!(second.get("k"), Some(json!(1)));
        assert!(shared.local_map("b").is_empty());
        assert_eq!(shared.local_map_names().len(), 2);
    }

    #[tokio::test]
    async fn async_map_falls_back_to_local() {
        let shared = SharedData::new(None);
        assert!(!shared.is_clustered());

        let map = shared.async_map("m").await.unwrap();
        map.put("k", json!("v")).await.unwrap();

        let again = shared.async_map("m").await.unwrap();
        assert_eq!(again.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn async_map_uses_cluster_when_configured() {
        let cluster = InMemoryCluster::new();
        let manager = cluster.manager();
        manager.join(&ClusterBind::default()).await.unwrap();

        let shared = SharedData::new(Some(Arc::clone(&manager)));
        assert!(shared.is_clustered());

        let map = shared.async_map("m").await.unwrap();
        map.put("k", json!(true)).await.unwrap();

        let peer = cluster.manager();
        peer.join(&ClusterBind::default()).await.unwrap();
        let peer_map = peer.async_map("m").await.unwrap();
        assert_eq!(peer_map.get("k").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn async_map_fails_for_inactive_cluster_node() {
        let cluster = InMemoryCluster::new();
        let shared = SharedData::new(Some(cluster.manager()));

        assert!(matches!(
            shared.async_map("m").await,
            Err(SharedDataError::Cluster(ClusterError::NotActive(_)))
        ));
    }
}
