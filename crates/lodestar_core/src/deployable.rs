//! Deployables and deployments.
//!
//! A [`Deployable`] describes a unit of work and how to deploy it; it owns no
//! running resources. Deploying it yields a [`Deployment`], the live handle.
//! Deploying the same deployable twice yields two independent deployments.

use core::fmt;
use std::sync::Arc;

use lodestar_hooks::context::CorrelationId;
use lodestar_runtime::runtime::RuntimeHandle;
use lodestar_runtime::verticle::{
    DeploymentError, DeploymentId, DeploymentOptions, Verticle, VerticleError, VerticleFactories,
    VerticleFactory,
};
use serde_json::Value;

use crate::discovery::DeployableType;

/// Errors raised while describing a deployable.
#[derive(Debug, thiserror::Error)]
pub enum DeployableError {
    /// The deployment options are malformed.
    #[error("invalid deployment options for '{name}': {reason}")]
    InvalidOptions {
        /// The unit name.
        name: String,
        /// What is wrong with the options.
        reason: String,
    },

    /// The named unit is unknown.
    #[error(transparent)]
    Verticle(#[from] VerticleError),
}

impl DeployableError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            DeployableError::InvalidOptions { .. } => "invalid_options",
            DeployableError::Verticle(_) => "verticle",
        }
    }
}

/// Immutable description of a unit of work.
#[derive(Clone)]
pub struct Deployable {
    name: String,
    factory: VerticleFactory,
    options: DeploymentOptions,
    correlation_id: CorrelationId,
}

impl fmt::Debug for Deployable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployable")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

impl Deployable {
    /// Describes a discovered unit type.
    ///
    /// `options` is `null` or `{ "instances": n, "config": {...} }`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployableError::InvalidOptions`] if `options` is malformed.
    pub fn from_type(
        ty: &DeployableType,
        correlation_id: &CorrelationId,
        options: Value,
    ) -> Result<Self, DeployableError> {
        Self::from_factory(ty.name(), Arc::clone(ty.factory()), correlation_id, options)
    }

    /// Describes an existing verticle. Every instance shares it.
    ///
    /// # Errors
    ///
    /// Returns [`DeployableError::InvalidOptions`] if `options` is malformed.
    pub fn from_verticle(
        verticle: Arc<dyn Verticle>,
        correlation_id: &CorrelationId,
        options: Value,
    ) -> Result<Self, DeployableError> {
        let name = verticle.name().to_string();
        let factory: VerticleFactory = Arc::new(
            move |_config: &Value| -> Result<Arc<dyn Verticle>, VerticleError> {
                Ok(Arc::clone(&verticle))
            },
        );
        Self::from_factory(name, factory, correlation_id, options)
    }

    /// Describes a unit created by `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployableError::InvalidOptions`] if `options` is malformed.
    pub fn from_factory(
        name: impl Into<String>,
        factory: VerticleFactory,
        correlation_id: &CorrelationId,
        options: Value,
    ) -> Result<Self, DeployableError> {
        let name = name.into();
        let options = parse_options(&name, options)?;
        Ok(Self {
            name,
            factory,
            options,
            correlation_id: correlation_id.clone(),
        })
    }

    /// Describes the unit registered under `name` in `factories`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployableError::Verticle`] if `name` is unknown, or
    /// [`DeployableError::InvalidOptions`] if `options` is malformed.
    pub fn from_name(
        factories: &VerticleFactories,
        name: &str,
        correlation_id: &CorrelationId,
        options: Value,
    ) -> Result<Self, DeployableError> {
        let factory = factories.get(name)?;
        Self::from_factory(name, factory, correlation_id, options)
    }

    /// Returns the unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the deployment options.
    #[must_use]
    pub fn options(&self) -> &DeploymentOptions {
        &self.options
    }

    /// Returns the correlation id the deployable was described under.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Deploys the unit on `handle`.
    ///
    /// # Errors
    ///
    /// Returns the [`DeploymentError`] of the runtime if the unit fails to
    /// deploy.
    pub async fn deploy(
        &self,
        handle: &RuntimeHandle,
        correlation_id: &CorrelationId,
    ) -> Result<Deployment, DeploymentError> {
        match handle
            .deploy_verticle(Arc::clone(&self.factory), self.options.clone())
            .await
        {
            Ok(id) => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    unit = %self.name,
                    deployment = %id,
                    instances = self.options.instances,
                    "deployed unit"
                );
                Ok(Deployment {
                    id,
                    name: self.name.clone(),
                    handle: handle.clone(),
                })
            }
            Err(err) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    unit = %self.name,
                    error = %err,
                    label = err.as_label(),
                    "failed to deploy unit"
                );
                Err(err)
            }
        }
    }
}

fn parse_options(name: &str, options: Value) -> Result<DeploymentOptions, DeployableError> {
    let parsed = match options {
        Value::Null => DeploymentOptions::default(),
        other => serde_json::from_value::<DeploymentOptions>(other).map_err(|err| {
            DeployableError::InvalidOptions {
                name: name.to_string(),
                reason: err.to_string(),
            }
        })?,
    };
    if parsed.instances == 0 {
        return Err(DeployableError::InvalidOptions {
            name: name.to_string(),
            reason: "instances must be at least 1".to_string(),
        });
    }
    Ok(parsed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Deployment
// ─────────────────────────────────────────────────────────────────────────────

/// A live deployment of a unit.
#[derive(Debug, Clone)]
pub struct Deployment {
    id: DeploymentId,
    name: String,
    handle: RuntimeHandle,
}

impl Deployment {
    /// Returns the deployment id.
    #[must_use]
    pub fn id(&self) -> &DeploymentId {
        &self.id
    }

    /// Returns the unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true until the deployment is undeployed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.handle.deployment_name(&self.id).is_some()
    }

    /// Stops every instance of the unit.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::UnknownDeployment`] if it is no longer live,
    /// or [`DeploymentError::Undeploy`] if some instances failed to stop.
    pub async fn undeploy(&self) -> Result<(), DeploymentError> {
        self.handle.undeploy(&self.id).await
    }
}
