//! Discovery of deployable units and hook sources.
//!
//! A [`DiscoveryScanner`] tells the bootstrap which unit types exist and which
//! hook sources to register. [`InventoryScanner`] collects what crates
//! submitted at link time with [`submit_deployable!`](crate::submit_deployable)
//! and [`submit_hook_source!`](crate::submit_hook_source);
//! [`ManifestScanner`] serves an explicit list.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lodestar_core::prelude::*;
//! use serde_json::Value;
//!
//! struct Reports;
//!
//! #[async_trait::async_trait]
//! impl Verticle for Reports {
//!     async fn start(&self, _ctx: &VerticleContext) -> Result<(), VerticleError> {
//!         Ok(())
//!     }
//! }
//!
//! fn reports(_config: &Value) -> Result<Arc<dyn Verticle>, VerticleError> {
//!     Ok(Arc::new(Reports))
//! }
//!
//! lodestar_core::submit_deployable!("reports", "STABLE", true, reports);
//!
//! let found = InventoryScanner.scan_for_deployables().unwrap();
//! assert!(found.iter().any(|ty| ty.name() == "reports"));
//! ```

use core::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use lodestar_hooks::source::{HookSource, StaticHookSource};
use lodestar_runtime::verticle::{Verticle, VerticleError, VerticleFactory};
use serde_json::Value;

use crate::profile::{ActiveProfiles, Profile};
use crate::units::UnitPolicy;

/// Errors raised while scanning.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A scanned location could not be read.
    #[error("failed to scan {path}: {source}")]
    Io {
        /// The location.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A scanned artifact is malformed.
    #[error("malformed artifact '{origin}': {reason}")]
    Malformed {
        /// Where the artifact came from.
        origin: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The scan itself could not run.
    #[error("scan failed: {0}")]
    Scan(String),
}

impl DiscoveryError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            DiscoveryError::Io { .. } => "io",
            DiscoveryError::Malformed { .. } => "malformed",
            DiscoveryError::Scan(_) => "scan",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeployableType
// ─────────────────────────────────────────────────────────────────────────────

/// A discovered unit type.
#[derive(Clone)]
pub struct DeployableType {
    name: String,
    auto_deploy: bool,
    profile: Profile,
    policy: UnitPolicy,
    factory: VerticleFactory,
}

impl fmt::Debug for DeployableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployableType")
            .field("name", &self.name)
            .field("auto_deploy", &self.auto_deploy)
            .field("profile", &self.profile)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DeployableType {
    /// Describes an auto-deployed, required unit type of `profile`.
    #[must_use]
    pub fn new(name: impl Into<String>, profile: Profile, factory: VerticleFactory) -> Self {
        Self {
            name: name.into(),
            auto_deploy: true,
            profile,
            policy: UnitPolicy::Required,
            factory,
        }
    }

    /// Sets whether the unit deploys without being asked.
    #[must_use]
    pub fn with_auto_deploy(mut self, auto_deploy: bool) -> Self {
        self.auto_deploy = auto_deploy;
        self
    }

    /// Sets what a failed deployment of this unit means for the bootstrap.
    #[must_use]
    pub fn with_policy(mut self, policy: UnitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the unit deploys without being asked.
    #[must_use]
    pub fn auto_deploy(&self) -> bool {
        self.auto_deploy
    }

    /// Returns the unit's profile.
    #[must_use]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Returns the unit's failure policy.
    #[must_use]
    pub fn policy(&self) -> UnitPolicy {
        self.policy
    }

    /// Returns the unit factory.
    #[must_use]
    pub fn factory(&self) -> &VerticleFactory {
        &self.factory
    }

    /// Returns true if the unit auto-deploys and its profile is active.
    #[must_use]
    pub fn is_eligible(&self, active: &ActiveProfiles) -> bool {
        self.auto_deploy && self.profile.is_active(active)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DiscoveryScanner
// ─────────────────────────────────────────────────────────────────────────────

/// Finds unit types and hook sources.
///
/// Scans may block; the bootstrap runs them on the worker pool.
pub trait DiscoveryScanner: Send + Sync + 'static {
    /// Returns every known unit type.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscoveryError`] if the scan fails.
    fn scan_for_deployables(&self) -> Result<Vec<DeployableType>, DiscoveryError>;

    /// Returns every known hook source.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscoveryError`] if the scan fails.
    fn scan_for_hooks(&self) -> Result<Vec<Arc<dyn HookSource>>, DiscoveryError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// InventoryScanner
// ─────────────────────────────────────────────────────────────────────────────

/// A unit type submitted at link time.
#[derive(Debug)]
pub struct DeployableRegistration {
    name: &'static str,
    profile: &'static str,
    auto_deploy: bool,
    factory: fn(&Value) -> Result<Arc<dyn Verticle>, VerticleError>,
}

impl DeployableRegistration {
    /// Creates a registration. Used by [`submit_deployable!`](crate::submit_deployable).
    #[must_use]
    pub const fn new(
        name: &'static str,
        profile: &'static str,
        auto_deploy: bool,
        factory: fn(&Value) -> Result<Arc<dyn Verticle>, VerticleError>,
    ) -> Self {
        Self {
            name,
            profile,
            auto_deploy,
            factory,
        }
    }

    fn to_type(&self) -> DeployableType {
        DeployableType::new(self.name, Profile::new(self.profile), Arc::new(self.factory))
            .with_auto_deploy(self.auto_deploy)
    }
}

/// A hook source submitted at link time.
#[derive(Debug)]
pub struct HookSourceRegistration {
    source: StaticHookSource,
}

impl HookSourceRegistration {
    /// Creates a registration. Used by [`submit_hook_source!`](crate::submit_hook_source).
    #[must_use]
    pub const fn new(source: StaticHookSource) -> Self {
        Self { source }
    }
}

inventory::collect!(DeployableRegistration);
inventory::collect!(HookSourceRegistration);

/// Submits a unit type for link-time discovery.
///
/// Arguments: unit name, profile name, auto-deploy flag and a factory function
/// `fn(&serde_json::Value) -> Result<Arc<dyn Verticle>, VerticleError>`.
#[macro_export]
macro_rules! submit_deployable {
    ($name:expr, $profile:expr, $auto_deploy:expr, $factory:expr $(,)?) => {
        $crate::inventory::submit! {
            $crate::discovery::DeployableRegistration::new($name, $profile, $auto_deploy, $factory)
        }
    };
}

/// Submits a hook source for link-time discovery.
///
/// Arguments: source name and a function returning its hook definitions.
#[macro_export]
macro_rules! submit_hook_source {
    ($name:expr, $hooks:expr $(,)?) => {
        $crate::inventory::submit! {
            $crate::discovery::HookSourceRegistration::new(
                $crate::hooks::source::StaticHookSource::new($name, $hooks)
            )
        }
    };
}

/// Scanner over everything submitted at link time.
///
/// Enumeration order follows the linker and is not stable.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryScanner;

impl DiscoveryScanner for InventoryScanner {
    fn scan_for_deployables(&self) -> Result<Vec<DeployableType>, DiscoveryError> {
        Ok(inventory::iter::<DeployableRegistration>
            .into_iter()
            .map(DeployableRegistration::to_type)
            .collect())
    }

    fn scan_for_hooks(&self) -> Result<Vec<Arc<dyn HookSource>>, DiscoveryError> {
        Ok(inventory::iter::<HookSourceRegistration>
            .into_iter()
            .map(|registration| Arc::new(registration.source) as Arc<dyn HookSource>)
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ManifestScanner
// ─────────────────────────────────────────────────────────────────────────────

/// Scanner over an explicit list of unit types and hook sources.
#[derive(Clone, Default)]
pub struct ManifestScanner {
    deployables: Vec<DeployableType>,
    hooks: Vec<Arc<dyn HookSource>>,
}

impl fmt::Debug for ManifestScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestScanner")
            .field("deployables", &self.deployables)
            .field("hooks", &self.hooks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ManifestScanner {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit type.
    #[must_use]
    pub fn with_deployable(mut self, deployable: DeployableType) -> Self {
        self.deployables.push(deployable);
        self
    }

    /// Adds a hook source.
    #[must_use]
    pub fn with_hook_source(mut self, source: Arc<dyn HookSource>) -> Self {
        self.hooks.push(source);
        self
    }
}

impl DiscoveryScanner for ManifestScanner {
    fn scan_for_deployables(&self) -> Result<Vec<DeployableType>, DiscoveryError> {
        Ok(self.deployables.clone())
    }

    fn scan_for_hooks(&self) -> Result<Vec<Arc<dyn HookSource>>, DiscoveryError> {
        Ok(self.hooks.clone())
    }
}
