//! The live node created by a bootstrap.

use core::fmt;
use std::sync::{Arc, OnceLock};

use hashbrown::HashSet;
use lodestar_hooks::registry::HookRegistry;
use lodestar_runtime::runtime::RuntimeHandle;
use lodestar_runtime::shared::{AsyncMap, LocalMap, SharedDataError};
use lodestar_runtime::verticle::VerticleFactories;
use parking_lot::RwLock;
use tokio::sync::OnceCell;

use crate::logging::LogControl;
use crate::options::Options;
use crate::tracking::{LOGGING_STRATEGY, TrackingStrategy};

/// Name of the instance-wide local map.
pub const SHARED_MAP_NAME: &str = "lodestar.sharedMap";

/// Name of the instance-wide async map.
pub const SHARED_ASYNC_MAP_NAME: &str = "lodestar.sharedAsyncMap";

/// A bootstrapped node.
///
/// Owns the runtime handle, the options it was bootstrapped with and the hook
/// registry. Obtain it from the bootstrap result or from the
/// [`InstanceRegistry`](crate::registry::InstanceRegistry) by runtime handle.
pub struct Instance {
    handle: RuntimeHandle,
    options: Arc<Options>,
    hooks: Arc<HookRegistry>,
    local_map: LocalMap,
    async_map: OnceCell<Arc<dyn AsyncMap>>,
    tracking: OnceLock<Arc<dyn TrackingStrategy>>,
    local_consumers: RwLock<HashSet<String>>,
    log_control: LogControl,
    verticle_factories: VerticleFactories,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("runtime", self.handle.id())
            .field("name", &self.options.instance_name)
            .field("tracking", &self.tracking_strategy_name())
            .field("local_consumers", &self.local_consumers.read().len())
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new(
        handle: RuntimeHandle,
        options: Arc<Options>,
        hooks: Arc<HookRegistry>,
        log_control: LogControl,
        verticle_factories: VerticleFactories,
    ) -> Self {
        let local_map = handle.shared_data().local_map(SHARED_MAP_NAME);
        Self {
            handle,
            options,
            hooks,
            local_map,
            async_map: OnceCell::new(),
            tracking: OnceLock::new(),
            local_consumers: RwLock::new(HashSet::new()),
            log_control,
            verticle_factories,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(handle: RuntimeHandle, options: Options) -> Self {
        Self::new(
            handle,
            Arc::new(options),
            Arc::new(HookRegistry::new()),
            LogControl::detached("info"),
            VerticleFactories::new(),
        )
    }

    /// Returns the runtime handle.
    #[must_use]
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// Returns the options the instance was bootstrapped with.
    #[must_use]
    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// Returns the hook registry.
    #[must_use]
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Returns the instance-wide local map.
    #[must_use]
    pub fn local_map(&self) -> &LocalMap {
        &self.local_map
    }

    /// Returns the instance-wide async map.
    ///
    /// Cluster-backed when the runtime is clustered, otherwise local. The map
    /// is resolved once and reused.
    ///
    /// # Errors
    ///
    /// Returns a [`SharedDataError`] if the map cannot be resolved.
    pub async fn async_map(&self) -> Result<Arc<dyn AsyncMap>, SharedDataError> {
        self.async_map
            .get_or_try_init(|| self.handle.shared_data().async_map(SHARED_ASYNC_MAP_NAME))
            .await
            .cloned()
    }

    /// Returns the name of the installed tracking strategy.
    #[must_use]
    pub fn tracking_strategy_name(&self) -> &str {
        self.tracking
            .get()
            .map_or(LOGGING_STRATEGY, |strategy| strategy.name())
    }

    /// Returns the installed tracking strategy.
    #[must_use]
    pub fn tracking_strategy(&self) -> Option<&Arc<dyn TrackingStrategy>> {
        self.tracking.get()
    }

    pub(crate) fn set_tracking_strategy(&self, strategy: Arc<dyn TrackingStrategy>) {
        if self.tracking.set(strategy).is_err() {
            tracing::debug!(runtime = %self.handle.id(), "tracking strategy already installed");
        }
    }

    /// Returns the control over the active log filter.
    #[must_use]
    pub fn log_control(&self) -> &LogControl {
        &self.log_control
    }

    /// Returns the factories used for runtime-loaded units.
    #[must_use]
    pub fn verticle_factories(&self) -> &VerticleFactories {
        &self.verticle_factories
    }

    // ─────────────────────────────────────────────────────────────────────
    // Local consumers
    // ─────────────────────────────────────────────────────────────────────

    /// Records that a consumer for `address` lives in this process.
    ///
    /// Returns false if it was already recorded.
    pub fn register_local_consumer(&self, address: impl Into<String>) -> bool {
        self.local_consumers.write().insert(address.into())
    }

    /// Forgets the local consumer for `address`.
    ///
    /// Returns false if none was recorded.
    pub fn unregister_local_consumer(&self, address: &str) -> bool {
        self.local_consumers.write().remove(address)
    }

    /// Returns true if a consumer for `address` lives in this process.
    #[must_use]
    pub fn is_local_consumer_available(&self, address: &str) -> bool {
        self.local_consumers.read().contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_runtime::runtime::{Runtime, RuntimeOptions};
    use serde_json::json;

    #[tokio::test]
    async fn async_map_falls_back_to_local_and_is_reused() {
        let handle = Runtime::standalone(RuntimeOptions::default());
        let instance = Instance::for_tests(handle.clone(), Options::default());

        let first = instance.async_map().await.expect("async map");
        first.put("k", json!(1)).await.expect("put");
        let second = instance.async_map().await.expect("async map");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get("k").await.expect("get"), Some(json!(1)));
        handle.close().await;
    }

    #[tokio::test]
    async fn local_consumers_are_tracked_by_address() {
        let handle = Runtime::standalone(RuntimeOptions::default());
        let instance = Instance::for_tests(handle.clone(), Options::default());

        assert!(instance.register_local_consumer("orders"));
        assert!(!instance.register_local_consumer("orders"));
        assert!(instance.is_local_consumer_available("orders"));
        assert!(instance.unregister_local_consumer("orders"));
        assert!(!instance.is_local_consumer_available("orders"));
        assert_eq!(instance.tracking_strategy_name(), LOGGING_STRATEGY);
        handle.close().await;
    }
}
