//! Deployable units of work.
//!
//! A [`Verticle`] is started once per deployed instance and stopped when its
//! deployment is undeployed or the runtime closes. Verticles are created by a
//! [`VerticleFactory`] so that one deployment can run several instances.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lodestar_runtime::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Verticle for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn start(&self, ctx: &VerticleContext) -> Result<(), VerticleError> {
//!         ctx.runtime().event_bus().consumer("echo", |mut msg| {
//!             let body = msg.body::<String>().cloned().unwrap_or_default();
//!             msg.reply(body);
//!         });
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handle = Runtime::standalone(RuntimeOptions::default());
//! let factory: VerticleFactory = Arc::new(
//!     |_config: &serde_json::Value| -> Result<Arc<dyn Verticle>, VerticleError> {
//!         Ok(Arc::new(Echo))
//!     },
//! );
//! let id = handle
//!     .deploy_verticle(factory, DeploymentOptions::default())
//!     .await
//!     .unwrap();
//!
//! let reply: String = handle.event_bus().request("echo", "ping".to_string()).await.unwrap();
//! assert_eq!(reply, "ping");
//!
//! handle.undeploy(&id).await.unwrap();
//! # }
//! ```

mod deployment;

pub use deployment::{DeploymentError, DeploymentId, DeploymentOptions};
pub(crate) use deployment::{Deployments, LiveDeployment};

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bus::BusError;
use crate::runtime::RuntimeHandle;
use crate::shared::SharedDataError;

/// Errors raised by verticles and verticle factories.
#[derive(Debug, thiserror::Error)]
pub enum VerticleError {
    /// The unit configuration is unusable.
    #[error("invalid configuration for '{verticle}': {reason}")]
    InvalidConfig {
        /// The verticle name.
        verticle: String,
        /// What is wrong with the configuration.
        reason: String,
    },

    /// No factory is registered under this name.
    #[error("unknown verticle '{0}'")]
    UnknownVerticle(String),

    /// The verticle failed to start.
    #[error("verticle '{verticle}' failed to start: {reason}")]
    Start {
        /// The verticle name.
        verticle: String,
        /// Why it failed.
        reason: String,
    },

    /// The verticle failed to stop cleanly.
    #[error("verticle '{verticle}' failed to stop: {reason}")]
    Stop {
        /// The verticle name.
        verticle: String,
        /// Why it failed.
        reason: String,
    },

    /// An event bus operation failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// A shared data operation failed.
    #[error(transparent)]
    SharedData(#[from] SharedDataError),

    /// An I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VerticleError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            VerticleError::InvalidConfig { .. } => "invalid_config",
            VerticleError::UnknownVerticle(_) => "unknown_verticle",
            VerticleError::Start { .. } => "start",
            VerticleError::Stop { .. } => "stop",
            VerticleError::Bus(_) => "bus",
            VerticleError::SharedData(_) => "shared_data",
            VerticleError::Io(_) => "io",
        }
    }
}

/// A deployable unit of work.
#[async_trait]
pub trait Verticle: Send + Sync + 'static {
    /// Returns a human-readable name for logs and errors.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Starts the verticle.
    ///
    /// Long-running work belongs in spawned tasks that observe
    /// [`VerticleContext::cancellation`].
    async fn start(&self, ctx: &VerticleContext) -> Result<(), VerticleError>;

    /// Stops the verticle. The default does nothing.
    async fn stop(&self, ctx: &VerticleContext) -> Result<(), VerticleError> {
        let _ = ctx;
        Ok(())
    }
}

/// Everything a verticle instance can see of its deployment.
#[derive(Debug, Clone)]
pub struct VerticleContext {
    runtime: RuntimeHandle,
    deployment_id: DeploymentId,
    instance_index: usize,
    config: Arc<Value>,
    cancellation: CancellationToken,
}

impl VerticleContext {
    pub(crate) fn new(
        runtime: RuntimeHandle,
        deployment_id: DeploymentId,
        instance_index: usize,
        config: Arc<Value>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            deployment_id,
            instance_index,
            config,
            cancellation,
        }
    }

    /// Returns the runtime the verticle is deployed on.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// Returns the owning deployment.
    #[must_use]
    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    /// Returns the zero-based index of this instance within its deployment.
    #[must_use]
    pub fn instance_index(&self) -> usize {
        self.instance_index
    }

    /// Returns the unit configuration.
    #[must_use]
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Returns a token cancelled when the deployment is undeployed.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factories
// ─────────────────────────────────────────────────────────────────────────────

/// Creates one verticle instance from the unit configuration.
pub type VerticleFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn Verticle>, VerticleError> + Send + Sync>;

/// Lookup table of verticle factories by name.
///
/// Lets configuration and unit descriptors name a verticle that is created at
/// runtime.
#[derive(Clone, Default)]
pub struct VerticleFactories {
    factories: HashMap<String, VerticleFactory>,
}

impl core::fmt::Debug for VerticleFactories {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl VerticleFactories {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any earlier entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Verticle>, VerticleError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Returns the factory registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VerticleError::UnknownVerticle`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<VerticleFactory, VerticleError> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| VerticleError::UnknownVerticle(name.to_string()))
    }

    /// Returns true if a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns all registered names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}
