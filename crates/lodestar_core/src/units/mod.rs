//! Built-in units and unit deployment.
//!
//! Every unit the bootstrap deploys carries a [`UnitPolicy`] saying whether
//! its failure aborts the bootstrap.
//!
//! # Built-in Units
//!
//! | Unit | Policy | Deployed when |
//! |------|--------|---------------|
//! | [`LoggerManagerVerticle`] | Required | always |
//! | [`ModelRefreshVerticle`] | Optional | `watch_files` |
//! | [`DeployerVerticle`] | Optional | `watch_files` |
//! | [`ServerVerticle`] | Required | `WEB` profile active |

mod deployer;
mod logger_manager;
mod model_refresh;
mod server;
mod watch;

pub use deployer::{DeployerVerticle, UnitDescriptor};
pub use logger_manager::{LOGGER_MANAGER_ADDRESS, LoggerCommand, LoggerManagerVerticle};
pub use model_refresh::{MODELS_CHANGED_ADDRESS, ModelRefreshVerticle};
pub use server::{
    ClosingConnectionHandler, ConnectionHandler, ConnectionInfo, SERVER_MAP_NAME, ServerVerticle,
};

use lodestar_hooks::context::CorrelationId;
use lodestar_runtime::runtime::RuntimeHandle;
use lodestar_runtime::verticle::DeploymentError;
use serde::{Deserialize, Serialize};

use crate::deployable::{Deployable, Deployment};

/// What a failed deployment of a unit means for the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitPolicy {
    /// The bootstrap fails.
    Required,
    /// The failure is logged and the bootstrap continues.
    Optional,
}

impl UnitPolicy {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UnitPolicy::Required => "required",
            UnitPolicy::Optional => "optional",
        }
    }
}

/// A deployable together with its failure policy.
#[derive(Debug, Clone)]
pub struct Unit {
    /// What to deploy.
    pub deployable: Deployable,
    /// What a failure means.
    pub policy: UnitPolicy,
}

impl Unit {
    /// Creates a required unit.
    #[must_use]
    pub fn required(deployable: Deployable) -> Self {
        Self {
            deployable,
            policy: UnitPolicy::Required,
        }
    }

    /// Creates an optional unit.
    #[must_use]
    pub fn optional(deployable: Deployable) -> Self {
        Self {
            deployable,
            policy: UnitPolicy::Optional,
        }
    }
}

/// A unit that failed to deploy.
#[derive(Debug)]
pub struct UnitFailure {
    /// The unit name.
    pub name: String,
    /// The unit's policy.
    pub policy: UnitPolicy,
    /// Why deployment failed.
    pub error: DeploymentError,
}

impl core::fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.policy.as_str(), self.error)
    }
}

/// Result of deploying a group of units.
#[derive(Debug, Default)]
pub struct UnitReport {
    /// Units that started.
    pub deployments: Vec<Deployment>,
    /// Units that did not.
    pub failures: Vec<UnitFailure>,
}

impl UnitReport {
    /// Returns true if a required unit failed.
    #[must_use]
    pub fn has_required_failure(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.policy == UnitPolicy::Required)
    }

    /// Moves the content of `other` into this report.
    pub fn merge(&mut self, other: UnitReport) {
        self.deployments.extend(other.deployments);
        self.failures.extend(other.failures);
    }
}

/// Deploys `units` concurrently and waits until every deployment settled.
///
/// One unit's failure never stops the others. Optional failures are logged
/// as warnings.
pub async fn deploy_units(
    handle: &RuntimeHandle,
    units: Vec<Unit>,
    correlation_id: &CorrelationId,
) -> UnitReport {
    let results = futures::future::join_all(
        units
            .iter()
            .map(|unit| unit.deployable.deploy(handle, correlation_id)),
    )
    .await;

    let mut report = UnitReport::default();
    for (unit, result) in units.into_iter().zip(results) {
        match result {
            Ok(deployment) => report.deployments.push(deployment),
            Err(error) => {
                if unit.policy == UnitPolicy::Optional {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        unit = unit.deployable.name(),
                        error = %error,
                        "optional unit failed to deploy, continuing"
                    );
                }
                report.failures.push(UnitFailure {
                    name: unit.deployable.name().to_string(),
                    policy: unit.policy,
                    error,
                });
            }
        }
    }
    report
}
