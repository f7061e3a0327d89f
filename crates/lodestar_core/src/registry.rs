//! Registry of live instances keyed by their runtime.

use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use lodestar_runtime::runtime::{RuntimeHandle, RuntimeId};
use parking_lot::RwLock;

use crate::instance::Instance;

/// Maps runtime ids to the [`Instance`] bootstrapped on them.
///
/// An instance is present from the moment bootstrap created it until its
/// runtime closes. Embedders that run a single node per process can use
/// [`InstanceRegistry::global`]; tests usually create their own.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<RuntimeId, Arc<Instance>>>,
}

static GLOBAL: OnceLock<Arc<InstanceRegistry>> = OnceLock::new();

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> Arc<InstanceRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(InstanceRegistry::new())))
    }

    /// Returns the instance bootstrapped on `handle`.
    #[must_use]
    pub fn get(&self, handle: &RuntimeHandle) -> Option<Arc<Instance>> {
        self.get_by_id(handle.id())
    }

    /// Returns the instance bootstrapped on the runtime `id`.
    #[must_use]
    pub fn get_by_id(&self, id: &RuntimeId) -> Option<Arc<Instance>> {
        self.instances.read().get(id).cloned()
    }

    /// Returns the number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Returns true if no instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    /// Returns the runtime ids of all live instances.
    #[must_use]
    pub fn ids(&self) -> Vec<RuntimeId> {
        self.instances.read().keys().cloned().collect()
    }

    /// Inserts `instance` unless its runtime already has one.
    pub(crate) fn insert(&self, instance: Arc<Instance>) -> bool {
        let id = instance.handle().id().clone();
        let mut instances = self.instances.write();
        if instances.contains_key(&id) {
            return false;
        }
        instances.insert(id, instance);
        true
    }

    pub(crate) fn remove(&self, id: &RuntimeId) -> Option<Arc<Instance>> {
        self.instances.write().remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use lodestar_runtime::runtime::{Runtime, RuntimeOptions};

    #[tokio::test]
    async fn one_instance_per_runtime() {
        let registry = InstanceRegistry::new();
        let handle = Runtime::standalone(RuntimeOptions::default());
        let instance = Arc::new(Instance::for_tests(handle.clone(), Options::default()));

        assert!(registry.insert(Arc::clone(&instance)));
        assert!(!registry.insert(Arc::new(Instance::for_tests(handle.clone(), Options::default()))));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(&handle).expect("present"), &instance));

        assert!(registry.remove(handle.id()).is_some());
        assert!(registry.get(&handle).is_none());
        assert!(registry.is_empty());
        handle.close().await;
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(&InstanceRegistry::global(), &InstanceRegistry::global()));
    }
}
