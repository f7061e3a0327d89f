//! The runtime substrate of Lodestar (Layer 1).
//!
//! `lodestar_runtime` provides the primitives every Lodestar node is built on:
//!
//! - [`runtime`] - The [`RuntimeHandle`](runtime::RuntimeHandle): worker pool,
//!   close hooks and deployment bookkeeping
//! - [`verticle`] - The [`Verticle`](verticle::Verticle) trait for deployable units of work
//! - [`bus`] - The in-process event bus with codecs and interceptors
//! - [`shared`] - Local maps and asynchronous (cluster-capable) maps
//! - [`cluster`] - Cluster manager abstraction and an in-process implementation
//!
//! # Architecture
//!
//! - **Layer 1** (`lodestar_runtime`): Runtime primitives (this crate)
//! - **Layer 2** (`lodestar_hooks`): Lifecycle phases and hook execution
//! - **Layer 3** (`lodestar_core`): Instance bootstrap and shutdown orchestration
//!
//! # Example
//!
//! ```
//! use lodestar_runtime::runtime::{Runtime, RuntimeOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handle = Runtime::standalone(RuntimeOptions::default());
//! let map = handle.shared_data().local_map("settings");
//! map.insert("greeting", serde_json::json!("hello"));
//!
//! handle.close().await;
//! assert!(handle.is_closed());
//! # }
//! ```

/// In-process event bus.
pub mod bus;

/// Cluster manager abstraction.
pub mod cluster;

/// Runtime handle and lifecycle.
pub mod runtime;

/// Shared data structures.
pub mod shared;

/// Deployable units of work.
pub mod verticle;

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = core::pin::Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::BoxFuture;
    pub use crate::bus::*;
    pub use crate::cluster::*;
    pub use crate::runtime::*;
    pub use crate::shared::*;
    pub use crate::verticle::*;
}
