//! Bootstrapping an instance.
//!
//! [`Bootstrap::run`] turns [`Options`] into a live [`Instance`] in a fixed
//! sequence:
//!
//! 1. Validate the options and create the runtime (joining the cluster when
//!    clustered; a failed join is fatal), then create the log directory on a
//!    best-effort basis.
//! 2. Register the instance and install the shutdown hook.
//! 3. Discover hook sources and register their hooks.
//! 4. Execute [`BeforeBootstrap`] hooks.
//! 5. Install the message tracking interceptors.
//! 6. Resolve the instance async map.
//! 7. Register event bus codecs.
//! 8. Apply the default time zone.
//! 9. Deploy system units, then web units (only with the `WEB` profile), then
//!    discovered units whose profile is active.
//! 10. Execute [`AfterStartup`] hooks.
//!
//! Any failure after step 1 closes the runtime before the error is returned,
//! which runs the [`BeforeShutdown`] hooks. Closing the runtime from a hook
//! while bootstrapping fails the bootstrap with [`BootstrapError::RuntimeClosed`].
//!
//! # Example
//!
//! ```
//! use lodestar_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = std::sync::Arc::new(InstanceRegistry::new());
//! let options = Options::new()
//!     .with_working_directory(std::env::temp_dir())
//!     .with_active_profiles([Profile::CORE])
//!     .with_watch_files(false)
//!     .with_ignore_class_path(true);
//!
//! let bootstrapped = Bootstrap::new(options)
//!     .with_registry(registry.clone())
//!     .run()
//!     .await
//!     .unwrap();
//!
//! let handle = bootstrapped.instance.handle().clone();
//! assert!(registry.get(&handle).is_some());
//!
//! handle.close().await;
//! assert!(registry.get(&handle).is_none());
//! # }
//! ```

use core::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use lodestar_hooks::context::{CorrelationId, HookContext};
use lodestar_hooks::outcome::HookOutcome;
use lodestar_hooks::phase::{AfterStartup, BeforeBootstrap, BeforeShutdown, Phase};
use lodestar_hooks::registry::HookRegistry;
use lodestar_runtime::bus::CodecFactories;
use lodestar_runtime::cluster::{ClusterError, ClusterManager, InMemoryCluster};
use lodestar_runtime::runtime::{Runtime, RuntimeError, RuntimeHandle, RuntimeId};
use lodestar_runtime::shared::SharedDataError;
use lodestar_runtime::verticle::{Verticle, VerticleFactories};
use serde_json::Value;

use crate::codecs::{default_codec_factories, default_codecs, register_codecs};
use crate::deployable::{Deployable, DeployableError, Deployment};
use crate::discovery::{DiscoveryError, DiscoveryScanner, InventoryScanner};
use crate::instance::Instance;
use crate::logging::LogControl;
use crate::options::{Options, OptionsError};
use crate::profile::Profile;
use crate::registry::InstanceRegistry;
use crate::time_zone::apply_default_time_zone;
use crate::tracking::{TrackingInterceptor, TrackingStrategies};
use crate::units::{
    ClosingConnectionHandler, ConnectionHandler, DeployerVerticle, LoggerManagerVerticle,
    ModelRefreshVerticle, ServerVerticle, Unit, UnitFailure, UnitReport, deploy_units,
};

/// Correlation id of everything logged while bootstrapping.
pub const BOOTSTRAP_CORRELATION_ID: &str = "Initializing-Lodestar";

/// Correlation id of the shutdown hooks.
pub const SHUTDOWN_CORRELATION_ID: &str = "Shutdown-Lodestar";

const SHUTDOWN_HOOK_NAME: &str = "lodestar.beforeShutdown";

/// Errors that abort a bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The options are invalid.
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// The node could not join the cluster.
    #[error("failed to join the cluster: {0}")]
    ClusterJoin(#[source] ClusterError),

    /// The runtime could not be created or used.
    #[error(transparent)]
    Runtime(RuntimeError),

    /// The runtime already hosts an instance.
    #[error("runtime {0} already hosts an instance")]
    AlreadyBootstrapped(RuntimeId),

    /// The runtime started closing while bootstrapping.
    #[error("runtime {0} closed during bootstrap")]
    RuntimeClosed(RuntimeId),

    /// The instance async map could not be resolved.
    #[error("shared state unavailable: {0}")]
    SharedState(#[from] SharedDataError),

    /// A unit could not be described.
    #[error(transparent)]
    InvalidUnit(#[from] DeployableError),

    /// Required units failed to deploy.
    #[error("{} unit(s) failed to deploy", .failures.len())]
    Deployment {
        /// Every unit that failed, required or not.
        failures: Vec<UnitFailure>,
    },

    /// Hook or unit discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl BootstrapError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            BootstrapError::Options(_) => "options",
            BootstrapError::ClusterJoin(_) => "cluster_join",
            BootstrapError::Runtime(_) => "runtime",
            BootstrapError::AlreadyBootstrapped(_) => "already_bootstrapped",
            BootstrapError::RuntimeClosed(_) => "runtime_closed",
            BootstrapError::SharedState(_) => "shared_state",
            BootstrapError::InvalidUnit(_) => "invalid_unit",
            BootstrapError::Deployment { .. } => "deployment",
            BootstrapError::Discovery(_) => "discovery",
        }
    }
}

/// A successfully bootstrapped instance.
#[derive(Debug)]
pub struct Bootstrapped {
    /// The live instance.
    pub instance: Arc<Instance>,
    /// Every unit deployed during bootstrap, in deployment group order.
    pub deployments: Vec<Deployment>,
    /// Outcome of the [`BeforeBootstrap`] hooks.
    pub before_bootstrap: HookOutcome,
    /// Outcome of the [`AfterStartup`] hooks.
    pub after_startup: HookOutcome,
    /// Optional units that failed to deploy.
    pub unit_failures: Vec<UnitFailure>,
}

/// Builder and entry point of a bootstrap.
pub struct Bootstrap {
    options: Options,
    registry: Option<Arc<InstanceRegistry>>,
    scanner: Arc<dyn DiscoveryScanner>,
    runtime: Option<RuntimeHandle>,
    cluster_manager: Option<Arc<dyn ClusterManager>>,
    verticle_factories: VerticleFactories,
    codec_factories: CodecFactories,
    tracking_strategies: TrackingStrategies,
    web_units: Vec<Deployable>,
    connection_handler: Arc<dyn ConnectionHandler>,
    log_control: Option<LogControl>,
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("options", &self.options)
            .field("runtime", &self.runtime)
            .field("web_units", &self.web_units)
            .finish_non_exhaustive()
    }
}

impl Bootstrap {
    /// Prepares a bootstrap of `options` with link-time discovery and the
    /// process-wide registry.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self {
            options,
            registry: None,
            scanner: Arc::new(InventoryScanner),
            runtime: None,
            cluster_manager: None,
            verticle_factories: VerticleFactories::new(),
            codec_factories: default_codec_factories(),
            tracking_strategies: TrackingStrategies::default(),
            web_units: Vec::new(),
            connection_handler: Arc::new(ClosingConnectionHandler),
            log_control: None,
        }
    }

    /// Registers the instance in `registry` instead of [`InstanceRegistry::global`].
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<InstanceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Discovers hooks and units with `scanner`.
    #[must_use]
    pub fn with_scanner(mut self, scanner: impl DiscoveryScanner) -> Self {
        self.scanner = Arc::new(scanner);
        self
    }

    /// Bootstraps on an existing runtime. Clustering options are ignored.
    #[must_use]
    pub fn with_runtime(mut self, handle: RuntimeHandle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Joins the cluster through `manager` when the options are clustered.
    ///
    /// Without a manager a clustered node joins a fresh in-process cluster.
    #[must_use]
    pub fn with_cluster_manager(mut self, manager: Arc<dyn ClusterManager>) -> Self {
        self.cluster_manager = Some(manager);
        self
    }

    /// Uses `factories` for units named in descriptors.
    #[must_use]
    pub fn with_verticle_factories(mut self, factories: VerticleFactories) -> Self {
        self.verticle_factories = factories;
        self
    }

    /// Resolves configured codecs through `factories`.
    #[must_use]
    pub fn with_codec_factories(mut self, factories: CodecFactories) -> Self {
        self.codec_factories = factories;
        self
    }

    /// Resolves the configured tracking strategy through `strategies`.
    #[must_use]
    pub fn with_tracking_strategies(mut self, strategies: TrackingStrategies) -> Self {
        self.tracking_strategies = strategies;
        self
    }

    /// Adds a unit deployed next to the server when `WEB` is active.
    #[must_use]
    pub fn with_web_unit(mut self, unit: Deployable) -> Self {
        self.web_units.push(unit);
        self
    }

    /// Serves accepted connections with `handler`.
    #[must_use]
    pub fn with_connection_handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.connection_handler = handler;
        self
    }

    /// Lets the logger manager unit change the filter behind `control`.
    #[must_use]
    pub fn with_log_control(mut self, control: LogControl) -> Self {
        self.log_control = Some(control);
        self
    }

    /// Runs the bootstrap.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::ClusterJoin`] if the cluster refuses the node,
    /// [`BootstrapError::Deployment`] if a required unit fails,
    /// [`BootstrapError::Discovery`] if scanning fails, or another
    /// [`BootstrapError`] for the remaining steps. The runtime is closed before
    /// any error past its creation is returned.
    pub async fn run(self) -> Result<Bootstrapped, BootstrapError> {
        let correlation_id = CorrelationId::new(BOOTSTRAP_CORRELATION_ID);
        self.options.validate()?;

        let Bootstrap {
            options,
            registry,
            scanner,
            runtime,
            cluster_manager,
            verticle_factories,
            codec_factories,
            tracking_strategies,
            web_units,
            connection_handler,
            log_control,
        } = self;
        let options = Arc::new(options);

        let handle = match runtime {
            Some(handle) => handle,
            None => create_runtime(&options, cluster_manager).await?,
        };
        tracing::info!(
            correlation_id = %correlation_id,
            runtime = %handle.id(),
            instance = %options.instance_name,
            clustered = handle.is_clustered(),
            "bootstrapping instance"
        );
        ensure_log_directory(&handle, options.log_directory(), &correlation_id).await;

        let registry = registry.unwrap_or_else(InstanceRegistry::global);
        let hooks = Arc::new(HookRegistry::new());
        let instance = Arc::new(Instance::new(
            handle.clone(),
            Arc::clone(&options),
            Arc::clone(&hooks),
            log_control.unwrap_or_else(|| LogControl::detached("info")),
            verticle_factories,
        ));

        // 2. Registration and shutdown hook
        if !registry.insert(Arc::clone(&instance)) {
            return Err(BootstrapError::AlreadyBootstrapped(handle.id().clone()));
        }
        if install_shutdown_hook(&handle, &registry).is_err() {
            registry.remove(handle.id());
            return Err(BootstrapError::RuntimeClosed(handle.id().clone()));
        }

        // 3. Hook discovery
        let mut discovery_failure = None;
        if !options.ignore_class_path {
            let hook_scanner = Arc::clone(&scanner);
            match handle
                .execute_blocking(move || hook_scanner.scan_for_hooks())
                .await
                .map_err(|err| DiscoveryError::Scan(err.to_string()))
                .and_then(|scan| scan)
            {
                Ok(sources) => {
                    for source in sources {
                        for result in hooks.register_hooks(source.as_ref(), &correlation_id) {
                            if let Err(err) = result {
                                tracing::warn!(correlation_id = %correlation_id, source = source.name(), error = %err, "hook not registered");
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(correlation_id = %correlation_id, error = %err, label = err.as_label(), "hook discovery failed");
                    discovery_failure = Some(err);
                }
            }
        }

        // 4. Before bootstrap
        let before_bootstrap = run_phase::<BeforeBootstrap>(&instance, &correlation_id).await;
        if handle.is_closing() {
            let err = BootstrapError::RuntimeClosed(handle.id().clone());
            return Err(abort(&handle, &correlation_id, err).await);
        }

        // 5. Tracking
        let strategy = tracking_strategies.create_or_default(&options.tracking_strategy);
        TrackingInterceptor::install(handle.event_bus(), &strategy);
        instance.set_tracking_strategy(strategy);

        // 6. Shared state
        if let Err(err) = instance.async_map().await {
            return Err(abort(&handle, &correlation_id, err.into()).await);
        }

        // 7. Codecs
        let registered = register_codecs(
            handle.event_bus(),
            default_codecs(),
            &codec_factories,
            &options.event_bus_codecs,
        );
        tracing::debug!(correlation_id = %correlation_id, codecs = registered, "registered codecs");

        // 8. Time zone
        if let Err(err) = apply_default_time_zone(&options.time_zone_id) {
            let err = OptionsError::Invalid {
                option: "timeZoneId",
                reason: err.to_string(),
            };
            return Err(abort(&handle, &correlation_id, err.into()).await);
        }

        // 9. Units
        if handle.is_closing() {
            let err = BootstrapError::RuntimeClosed(handle.id().clone());
            return Err(abort(&handle, &correlation_id, err).await);
        }
        let groups = match unit_groups(
            &instance,
            &correlation_id,
            web_units,
            connection_handler,
        ) {
            Ok(groups) => groups,
            Err(err) => return Err(abort(&handle, &correlation_id, err).await),
        };
        let mut report = UnitReport::default();
        for units in groups {
            report.merge(deploy_units(&handle, units, &correlation_id).await);
        }

        if !options.ignore_class_path {
            match discover_units(&handle, &scanner, &options, &correlation_id).await {
                Ok(units) => report.merge(deploy_units(&handle, units, &correlation_id).await),
                Err(err) => {
                    discovery_failure.get_or_insert(err);
                }
            }
        }

        if report.has_required_failure() {
            let err = BootstrapError::Deployment {
                failures: report.failures,
            };
            return Err(abort(&handle, &correlation_id, err).await);
        }
        if let Some(err) = discovery_failure {
            return Err(abort(&handle, &correlation_id, err.into()).await);
        }

        // 10. After startup
        let after_startup = run_phase::<AfterStartup>(&instance, &correlation_id).await;
        if handle.is_closing() {
            return Err(BootstrapError::RuntimeClosed(handle.id().clone()));
        }

        tracing::info!(
            correlation_id = %correlation_id,
            runtime = %handle.id(),
            instance = %options.instance_name,
            units = report.deployments.len(),
            "instance started"
        );
        Ok(Bootstrapped {
            instance,
            deployments: report.deployments,
            before_bootstrap,
            after_startup,
            unit_failures: report.failures,
        })
    }
}

async fn ensure_log_directory(handle: &RuntimeHandle, dir: PathBuf, correlation_id: &CorrelationId) {
    let target = dir.clone();
    let reason = match handle
        .execute_blocking(move || std::fs::create_dir_all(&target))
        .await
    {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(err) => err.to_string(),
    };
    tracing::warn!(correlation_id = %correlation_id, directory = %dir.display(), reason = %reason, "cannot create log directory");
}

async fn create_runtime(
    options: &Options,
    manager: Option<Arc<dyn ClusterManager>>,
) -> Result<RuntimeHandle, BootstrapError> {
    let manager = options
        .clustered
        .then(|| manager.unwrap_or_else(|| InMemoryCluster::new().manager()));
    Runtime::create(options.runtime_options(manager))
        .await
        .map_err(|err| match err {
            RuntimeError::ClusterJoin(source) => {
                tracing::error!(error = %source, "failed to join the cluster");
                BootstrapError::ClusterJoin(source)
            }
            other => BootstrapError::Runtime(other),
        })
}

fn install_shutdown_hook(
    handle: &RuntimeHandle,
    registry: &Arc<InstanceRegistry>,
) -> Result<(), RuntimeError> {
    let registry = Arc::clone(registry);
    let id = handle.id().clone();
    handle.add_close_hook(SHUTDOWN_HOOK_NAME, move || {
        Box::pin(async move {
            let Some(instance) = registry.get_by_id(&id) else {
                return Ok(());
            };
            let correlation_id = CorrelationId::new(SHUTDOWN_CORRELATION_ID);
            run_phase::<BeforeShutdown>(&instance, &correlation_id).await;
            registry.remove(&id);
            tracing::info!(correlation_id = %correlation_id, runtime = %id, "instance stopped");
            Ok(())
        })
    })
}

async fn run_phase<P: Phase>(instance: &Arc<Instance>, correlation_id: &CorrelationId) -> HookOutcome {
    let context = HookContext::of::<P>(correlation_id.clone()).with_payload(Arc::clone(instance));
    let outcome = instance.hooks().execute_hooks(context).await;
    for (hook, error) in outcome.failures() {
        tracing::warn!(
            correlation_id = %correlation_id,
            phase = outcome.phase().name(),
            hook,
            error = %error,
            "hook failed"
        );
    }
    outcome
}

async fn abort(
    handle: &RuntimeHandle,
    correlation_id: &CorrelationId,
    error: BootstrapError,
) -> BootstrapError {
    tracing::error!(
        correlation_id = %correlation_id,
        runtime = %handle.id(),
        error = %error,
        label = error.as_label(),
        "bootstrap failed, closing runtime"
    );
    handle.close().await;
    error
}

fn unit(verticle: Arc<dyn Verticle>, correlation_id: &CorrelationId) -> Result<Deployable, DeployableError> {
    Deployable::from_verticle(verticle, correlation_id, Value::Null)
}

/// System units, then web units when `WEB` is active.
fn unit_groups(
    instance: &Instance,
    correlation_id: &CorrelationId,
    web_units: Vec<Deployable>,
    connection_handler: Arc<dyn ConnectionHandler>,
) -> Result<Vec<Vec<Unit>>, BootstrapError> {
    let options = instance.options();

    let mut system = vec![Unit::required(unit(
        Arc::new(LoggerManagerVerticle::new(instance.log_control().clone())),
        correlation_id,
    )?)];
    if options.watch_files {
        let models = ModelRefreshVerticle::new(options.models_directory(), options.watch_interval());
        let deployer = DeployerVerticle::new(
            options.verticles_directory(),
            options.watch_interval(),
            instance.verticle_factories().clone(),
        );
        system.push(Unit::optional(unit(Arc::new(models), correlation_id)?));
        system.push(Unit::optional(unit(Arc::new(deployer), correlation_id)?));
    }

    let mut groups = vec![system];
    if options.is_profile_active(&Profile::WEB) {
        let server = ServerVerticle::new(options.server_port, connection_handler)
            .with_hooks(Arc::clone(instance.hooks()));
        let mut web = vec![Unit::required(unit(Arc::new(server), correlation_id)?)];
        web.extend(web_units.into_iter().map(Unit::required));
        groups.push(web);
    }
    Ok(groups)
}

/// Discovered units that are auto-deployed and whose profile is active.
async fn discover_units(
    handle: &RuntimeHandle,
    scanner: &Arc<dyn DiscoveryScanner>,
    options: &Options,
    correlation_id: &CorrelationId,
) -> Result<Vec<Unit>, DiscoveryError> {
    let scanner = Arc::clone(scanner);
    let types = handle
        .execute_blocking(move || scanner.scan_for_deployables())
        .await
        .map_err(|err| DiscoveryError::Scan(err.to_string()))??;

    let mut units = Vec::new();
    for ty in types {
        if !ty.is_eligible(&options.active_profiles) {
            tracing::debug!(correlation_id = %correlation_id, unit = ty.name(), profile = %ty.profile(), "skipping unit");
            continue;
        }
        match Deployable::from_type(&ty, correlation_id, Value::Null) {
            Ok(deployable) => units.push(Unit {
                deployable,
                policy: ty.policy(),
            }),
            Err(err) => {
                return Err(DiscoveryError::Malformed {
                    origin: ty.name().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(units)
}
