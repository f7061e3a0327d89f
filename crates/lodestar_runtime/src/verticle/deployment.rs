//! Deployment identifiers, options and bookkeeping.

use core::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Verticle, VerticleContext, VerticleError};
use crate::runtime::RuntimeId;

/// Unique identifier of a deployment.
///
/// Internally uses `Arc<str>` for cheap cloning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentId(Arc<str>);

impl DeploymentId {
    /// Creates a new deployment ID with a unique nanoid.
    #[must_use]
    pub fn new() -> Self {
        Self(nanoid::nanoid!().into())
    }

    /// Creates a deployment ID from a specific string value.
    #[must_use]
    pub fn from_string(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deployment_{}", self.0)
    }
}

/// How a verticle is deployed.
///
/// Deserializes from `{ "instances": 2, "config": { ... } }`; both fields are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeploymentOptions {
    /// Number of verticle instances to start.
    pub instances: usize,
    /// Configuration handed to the factory and to every instance.
    pub config: Value,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            instances: 1,
            config: Value::Object(serde_json::Map::new()),
        }
    }
}

impl DeploymentOptions {
    /// Sets the number of instances.
    #[must_use]
    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    /// Sets the unit configuration.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// Errors raised when deploying or undeploying.
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    /// The runtime is closing or closed.
    #[error("runtime {0} is closed")]
    RuntimeClosed(RuntimeId),

    /// A deployment needs at least one instance.
    #[error("a deployment needs at least one instance")]
    NoInstances,

    /// The factory could not create an instance.
    #[error("could not create verticle: {0}")]
    Create(#[source] VerticleError),

    /// An instance failed to start. Started siblings were stopped again.
    #[error("verticle '{verticle}' failed to start")]
    Start {
        /// The verticle name.
        verticle: String,
        /// The start failure.
        #[source]
        source: VerticleError,
    },

    /// No live deployment has this id.
    #[error("unknown deployment {0}")]
    UnknownDeployment(DeploymentId),

    /// Some instances failed to stop. The deployment is gone regardless.
    #[error("deployment {deployment} did not stop cleanly: {}", .failures.join("; "))]
    Undeploy {
        /// The undeployed deployment.
        deployment: DeploymentId,
        /// One message per failed instance.
        failures: Vec<String>,
    },
}

impl DeploymentError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            DeploymentError::RuntimeClosed(_) => "runtime_closed",
            DeploymentError::NoInstances => "no_instances",
            DeploymentError::Create(_) => "create",
            DeploymentError::Start { .. } => "start",
            DeploymentError::UnknownDeployment(_) => "unknown_deployment",
            DeploymentError::Undeploy { .. } => "undeploy",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

/// A started deployment.
pub(crate) struct LiveDeployment {
    pub(crate) name: String,
    pub(crate) instances: Vec<(Arc<dyn Verticle>, VerticleContext)>,
    pub(crate) cancellation: CancellationToken,
}

impl LiveDeployment {
    /// Cancels the deployment token and stops every instance, returning stop failures.
    pub(crate) async fn stop(self) -> Vec<String> {
        self.cancellation.cancel();
        let results = futures::future::join_all(
            self.instances
                .iter()
                .map(|(verticle, ctx)| verticle.stop(ctx)),
        )
        .await;
        results
            .into_iter()
            .filter_map(Result::err)
            .map(|err| err.to_string())
            .collect()
    }
}

/// Live deployments in deployment order.
#[derive(Default)]
pub(crate) struct Deployments {
    live: Mutex<IndexMap<DeploymentId, LiveDeployment>>,
}

impl Deployments {
    pub(crate) fn insert(&self, id: DeploymentId, deployment: LiveDeployment) {
        self.live.lock().insert(id, deployment);
    }

    pub(crate) fn remove(&self, id: &DeploymentId) -> Option<LiveDeployment> {
        self.live.lock().shift_remove(id)
    }

    pub(crate) fn ids(&self) -> Vec<DeploymentId> {
        self.live.lock().keys().cloned().collect()
    }

    pub(crate) fn name_of(&self, id: &DeploymentId) -> Option<String> {
        self.live.lock().get(id).map(|deployment| deployment.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_deserialize_with_defaults() {
        let options: DeploymentOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, DeploymentOptions::default());
        assert_eq!(options.instances, 1);

        let options: DeploymentOptions =
            serde_json::from_value(json!({"instances": 3, "config": {"port": 8080}})).unwrap();
        assert_eq!(options.instances, 3);
        assert_eq!(options.config["port"], 8080);

        assert!(serde_json::from_value::<DeploymentOptions>(json!({"instance": 3})).is_err());
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = DeploymentId::new();
        let b = DeploymentId::new();
        assert_ne!(a, b);
        assert_eq!(
            DeploymentId::from_string("x").to_string(),
            "deployment_x"
        );
    }
}
