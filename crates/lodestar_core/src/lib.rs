//! Instance bootstrap and lifecycle orchestration for Lodestar (Layer 3).
//!
//! `lodestar_core` turns a set of [`Options`](options::Options) into a live
//! [`Instance`](instance::Instance): it creates the runtime, registers hooks,
//! prepares the event bus and shared state, deploys units and tears all of it
//! down again when the runtime closes.
//!
//! # Core Types
//!
//! - [`Bootstrap`](bootstrap::Bootstrap) - Builder running the bootstrap sequence
//! - [`Instance`](instance::Instance) - A bootstrapped node
//! - [`InstanceRegistry`](registry::InstanceRegistry) - Live instances by runtime
//! - [`Deployable`](deployable::Deployable) - Description of a unit of work
//! - [`DiscoveryScanner`](discovery::DiscoveryScanner) - Source of unit types and hooks
//! - [`units`] - Built-in system and web units
//!
//! # Architecture
//!
//! - **Layer 1** (`lodestar_runtime`): Runtime primitives
//! - **Layer 2** (`lodestar_hooks`): Lifecycle phases and hook execution
//! - **Layer 3** (`lodestar_core`): Instance bootstrap and shutdown orchestration (this crate)

pub mod bootstrap;
pub mod codecs;
pub mod deployable;
pub mod discovery;
pub mod instance;
pub mod logging;
pub mod options;
pub mod profile;
pub mod registry;
pub mod time_zone;
pub mod tracking;
pub mod units;

#[doc(hidden)]
pub use inventory;
pub use lodestar_hooks as hooks;
pub use lodestar_hooks::context::CorrelationId;
pub use lodestar_runtime as runtime;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use lodestar_hooks::prelude::*;
    pub use lodestar_runtime::prelude::*;

    pub use crate::bootstrap::{Bootstrap, BootstrapError, Bootstrapped};
    pub use crate::codecs::{DataQuery, ImmutableJson};
    pub use crate::deployable::{Deployable, DeployableError, Deployment};
    pub use crate::discovery::{
        DeployableType, DiscoveryError, DiscoveryScanner, InventoryScanner, ManifestScanner,
    };
    pub use crate::instance::Instance;
    pub use crate::logging::{LogControl, LogFormat, LoggingOptions};
    pub use crate::options::{Options, OptionsError};
    pub use crate::profile::{ActiveProfiles, Profile};
    pub use crate::registry::InstanceRegistry;
    pub use crate::tracking::{TrackingData, TrackingStrategies, TrackingStrategy};
    pub use crate::units::{ConnectionHandler, ConnectionInfo, UnitPolicy};
}
