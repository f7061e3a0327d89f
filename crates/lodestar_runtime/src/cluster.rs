//! Cluster membership and cluster-wide state.
//!
//! A [`ClusterManager`] is the per-node view of a cluster: it joins and leaves
//! the cluster and hands out cluster-wide [`AsyncMap`]s. The runtime only
//! talks to this trait, so any provider can back a clustered node.
//!
//! [`InMemoryCluster`] is the bundled provider. Every runtime handle that joins
//! the same `InMemoryCluster` (through [`InMemoryCluster::manager`]) shares its
//! maps, which makes it suitable for embedded multi-node setups and tests.
//!
//! # Example
//!
//! ```
//! use lodestar_runtime::cluster::{ClusterBind, ClusterManager, InMemoryCluster};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cluster = InMemoryCluster::new();
//! let node_a = cluster.manager();
//! let node_b = cluster.manager();
//!
//! node_a.join(&ClusterBind::default()).await.unwrap();
//! node_b.join(&ClusterBind::default()).await.unwrap();
//!
//! let map_a = node_a.async_map("sessions").await.unwrap();
//! let map_b = node_b.async_map("sessions").await.unwrap();
//! map_a.put("s1", serde_json::json!(1)).await.unwrap();
//! assert_eq!(map_b.get("s1").await.unwrap(), Some(serde_json::json!(1)));
//! # }
//! ```

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use serde_json::Value;

use crate::shared::{AsyncMap, LocalMap, SharedDataError};

/// Errors raised by cluster managers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    /// The node could not join the cluster.
    #[error("node '{node}' could not join the cluster: {reason}")]
    JoinRefused {
        /// The node that attempted to join.
        node: String,
        /// Why the join was refused.
        reason: String,
    },

    /// The operation requires an active cluster membership.
    #[error("node '{0}' is not an active cluster member")]
    NotActive(String),

    /// Any other provider-specific failure.
    #[error("cluster provider error: {0}")]
    Provider(String),
}

/// Where a clustered node binds its cluster endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterBind {
    /// The cluster port. `0` lets the provider choose.
    pub port: u16,
    /// An externally-provided bind address, if any.
    pub host: Option<String>,
}

/// Per-node view of a cluster.
#[async_trait]
pub trait ClusterManager: Send + Sync + 'static {
    /// Returns this node's identifier.
    fn node_id(&self) -> &str;

    /// Joins the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::JoinRefused`] if the cluster does not accept the node.
    async fn join(&self, bind: &ClusterBind) -> Result<(), ClusterError>;

    /// Leaves the cluster. Leaving twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a provider error if leaving fails.
    async fn leave(&self) -> Result<(), ClusterError>;

    /// Returns true while the node is a cluster member.
    fn is_active(&self) -> bool;

    /// Returns identifiers of all current members.
    fn members(&self) -> Vec<String>;

    /// Resolves a cluster-wide asynchronous map.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::NotActive`] if the node has not joined.
    async fn async_map(&self, name: &str) -> Result<Arc<dyn AsyncMap>, ClusterError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InMemoryCluster
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ClusterState {
    maps: RwLock<HashMap<String, LocalMap>>,
    members: RwLock<HashSet<String>>,
    refuse_joins: AtomicBool,
}

/// A cluster whose members all live in the current process.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<ClusterState>,
}

impl core::fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryCluster")
            .field("members", &self.state.members.read().len())
            .field("maps", &self.state.maps.read().len())
            .finish()
    }
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager for a new node of this cluster.
    #[must_use]
    pub fn manager(&self) -> Arc<dyn ClusterManager> {
        Arc::new(InMemoryNode {
            id: nanoid::nanoid!(),
            state: Arc::clone(&self.state),
            active: AtomicBool::new(false),
        })
    }

    /// Makes every subsequent join fail (or succeed again with `false`).
    pub fn refuse_joins(&self, refuse: bool) {
        self.state.refuse_joins.store(refuse, Ordering::SeqCst);
    }

    /// Returns the number of current members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.state.members.read().len()
    }
}

struct InMemoryNode {
    id: String,
    state: Arc<ClusterState>,
    active: AtomicBool,
}

#[async_trait]
impl ClusterManager for InMemoryNode {
    fn node_id(&self) -> &str {
        &self.id
    }

    async fn join(&self, bind: &ClusterBind) -> Result<(), ClusterError> {
        if self.state.refuse_joins.load(Ordering::SeqCst) {
            return Err(ClusterError::JoinRefused {
                node: self.id.clone(),
                reason: "cluster is refusing new members".to_string(),
            });
        }
        self.state.members.write().insert(self.id.clone());
        self.active.store(true, Ordering::SeqCst);
        tracing::debug!(node = %self.id, port = bind.port, host = ?bind.host, "joined in-memory cluster");
        Ok(())
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        if self.active.swap(false, Ordering::SeqCst) {
            self.state.members.write().remove(&self.id);
            tracing::debug!(node = %self.id, "left in-memory cluster");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn members(&self) -> Vec<String> {
        self.state.members.read().iter().cloned().collect()
    }

    async fn async_map(&self, name: &str) -> Result<Arc<dyn AsyncMap>, ClusterError> {
        if !self.is_active() {
            return Err(ClusterError::NotActive(self.id.clone()));
        }
        let map = self
            .state
            .maps
            .write()
            .entry(name.to_string())
            .or_insert_with(|| LocalMap::new(name))
            .clone();
        Ok(Arc::new(ClusterMap {
            node: self.id.clone(),
            state: Arc::clone(&self.state),
            map,
        }))
    }
}

/// A cluster map view bound to one member node.
struct ClusterMap {
    node: String,
    state: Arc<ClusterState>,
    map: LocalMap,
}

impl ClusterMap {
    fn ensure_member(&self) -> Result<(), SharedDataError> {
        if self.state.members.read().contains(&self.node) {
            Ok(())
        } else {
            Err(SharedDataError::Cluster(ClusterError::NotActive(
                self.node.clone(),
            )))
        }
    }
}

#[async_trait]
impl AsyncMap for ClusterMap {
    async fn get(&self, key: &str) -> Result<Option<Value>, SharedDataError> {
        self.ensure_member()?;
        Ok(self.map.get(key))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), SharedDataError> {
        self.ensure_member()?;
        self.map.insert(key, value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Value) -> Result<Option<Value>, SharedDataError> {
        self.ensure_member()?;
        Ok(self.map.insert_if_absent(key, value))
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>, SharedDataError> {
        self.ensure_member()?;
        Ok(self.map.remove(key))
    }

    async fn keys(&self) -> Result<Vec<String>, SharedDataError> {
        self.ensure_member()?;
        Ok(self.map.keys())
    }

    async fn size(&self) -> Result<usize, SharedDataError> {
        self.ensure_member()?;
        Ok(self.map.len())
    }

    async fn clear(&self) -> Result<(), SharedDataError> {
        self.ensure_member()?;
        self.map.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn join_and_leave_track_membership() {
        let cluster = InMemoryCluster::new();
        let node = cluster.manager();

        assert!(!node.is_active());
        node.join(&ClusterBind::default()).await.unwrap();
        assert!(node.is_active());
        assert_eq!(cluster.member_count(), 1);
        assert_eq!(node.members(), vec![node.node_id().to_string()]);

        node.leave().await.unwrap();
        assert!(!node.is_active());
        assert_eq!(cluster.member_count(), 0);

        // leaving twice is a no-op
        node.leave().await.unwrap();
    }

    #[tokio::test]
    async fn refused_join_reports_node() {
        let cluster = InMemoryCluster::new();
        cluster.refuse_joins(true);
        let node = cluster.manager();

        let err = node.join(&ClusterBind::default()).await.unwrap_err();
        assert!(matches!(err, ClusterError::JoinRefused { .. }));
        assert!(!node.is_active());
    }

    #[tokio::test]
    async fn async_map_requires_membership() {
        let cluster = InMemoryCluster::new();
        let node = cluster.manager();

        assert!(matches!(
            node.async_map("m").await,
            Err(ClusterError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn maps_are_shared_between_members() {
        let cluster = InMemoryCluster::new();
        let a = cluster.manager();
        let b = cluster.manager();
        a.join(&ClusterBind::default()).await.unwrap();
        b.join(&ClusterBind::default()).await.unwrap();

        let map_a = a.async_map("shared").await.unwrap();
        let map_b = b.async_map("shared").await.unwrap();

        map_a.put("k", json!("v")).await.unwrap();
        assert_eq!(map_b.get("k").await.unwrap(), Some(json!("v")));
        assert_eq!(map_b.put_if_absent("k", json!("w")).await.unwrap(), Some(json!("v")));
        assert_eq!(map_a.size().await.unwrap(), 1);

        // a departed member can no longer use its view
        a.leave().await.unwrap();
        assert!(map_a.get("k").await.is_err());
        assert_eq!(map_b.remove("k").await.unwrap(), Some(json!("v")));
    }
}
