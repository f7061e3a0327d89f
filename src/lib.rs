//! A runtime platform that bootstraps a node, discovers deployable units and
//! orchestrates their lifecycle across a single process or a cluster.
//!
//! # Crates
//!
//! - [`lodestar_runtime`] (Layer 1): runtime handle, verticles, event bus, shared data, clustering
//! - [`lodestar_hooks`] (Layer 2): lifecycle phases and hook execution
//! - [`lodestar_core`] (Layer 3): instance bootstrap and shutdown orchestration
//!
//! # Example
//!
//! ```
//! use lodestar::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bootstrapped = Bootstrap::new(
//!     Options::new()
//!         .with_working_directory(std::env::temp_dir())
//!         .with_active_profiles([Profile::CORE])
//!         .with_watch_files(false)
//!         .with_ignore_class_path(true),
//! )
//! .with_registry(std::sync::Arc::new(InstanceRegistry::new()))
//! .run()
//! .await
//! .unwrap();
//!
//! bootstrapped.instance.handle().close().await;
//! # }
//! ```

/// Layer 1: Runtime primitives.
pub use lodestar_runtime;

/// Layer 2: Lifecycle phases and hooks.
pub use lodestar_hooks;

/// Layer 3: Bootstrap and lifecycle orchestration.
pub use lodestar_core;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use lodestar_core::prelude::*;
}
