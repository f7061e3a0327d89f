//! Runtime handle and lifecycle.
//!
//! A [`RuntimeHandle`] is the root object of a node. It owns the event bus,
//! the shared data accessor, the worker pool used for blocking work, the list
//! of live deployments and the close hooks.
//!
//! # Closing
//!
//! [`RuntimeHandle::close`] runs exactly once no matter how many callers
//! invoke it; every caller awaits the same execution. Closing proceeds in a
//! fixed order:
//!
//! 1. Close hooks, in reverse registration order. Failures are logged.
//! 2. Every live deployment is undeployed, newest first.
//! 3. A clustered node leaves its cluster.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::BoxFuture;
use crate::bus::EventBus;
use crate::cluster::{ClusterBind, ClusterError, ClusterManager};
use crate::shared::SharedData;
use crate::verticle::{
    DeploymentError, DeploymentId, DeploymentOptions, Deployments, LiveDeployment,
    VerticleContext, VerticleFactory,
};

/// Default number of worker threads for blocking work.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 20;

tokio::task_local! {
    /// Runtimes whose close is running on the current task.
    static CLOSING: Vec<RuntimeId>;
}

// ─────────────────────────────────────────────────────────────────────────────
// RuntimeId
// ─────────────────────────────────────────────────────────────────────────────

/// Process-unique identifier of a runtime handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeId(Arc<str>);

impl RuntimeId {
    /// Creates a new runtime ID with a unique nanoid.
    #[must_use]
    pub fn new() -> Self {
        Self(nanoid::nanoid!().into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RuntimeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime_{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Cluster settings of a clustered runtime.
#[derive(Clone)]
pub struct ClusterOptions {
    /// The node's view of the cluster.
    pub manager: Arc<dyn ClusterManager>,
    /// The cluster port. `0` lets the provider choose.
    pub port: u16,
    /// An externally-provided bind address.
    pub host: Option<String>,
}

impl fmt::Debug for ClusterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterOptions")
            .field("node", &self.manager.node_id())
            .field("port", &self.port)
            .field("host", &self.host)
            .finish()
    }
}

impl ClusterOptions {
    /// Creates cluster options for `manager` with provider-chosen port and no bind address.
    #[must_use]
    pub fn new(manager: Arc<dyn ClusterManager>) -> Self {
        Self {
            manager,
            port: 0,
            host: None,
        }
    }

    /// Sets the cluster port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the bind address.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// Settings of a runtime handle.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Number of event-loop threads the hosting async runtime should use.
    pub event_loop_pool_size: usize,
    /// Maximum number of blocking tasks running at once.
    pub worker_pool_size: usize,
    /// Cluster settings, `None` for a standalone runtime.
    pub cluster: Option<ClusterOptions>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            event_loop_pool_size: default_event_loop_pool_size(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            cluster: None,
        }
    }
}

impl RuntimeOptions {
    /// Sets the number of event-loop threads.
    #[must_use]
    pub fn with_event_loop_pool_size(mut self, size: usize) -> Self {
        self.event_loop_pool_size = size;
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Makes the runtime clustered.
    #[must_use]
    pub fn with_cluster(mut self, cluster: ClusterOptions) -> Self {
        self.cluster = Some(cluster);
        self
    }
}

/// Twice the available parallelism.
#[must_use]
pub fn default_event_loop_pool_size() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from) * 2
}

// ─────────────────────────────────────────────────────────────────────────────
// RuntimeError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the runtime handle.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Joining the cluster failed.
    #[error("failed to join the cluster: {0}")]
    ClusterJoin(#[source] ClusterError),

    /// A clustered runtime was requested without cluster options.
    #[error("clustering requested but no cluster options were given")]
    NotClustered,

    /// The runtime is closing or closed.
    #[error("runtime {0} is closed")]
    Closed(RuntimeId),

    /// A blocking task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// A close hook failed.
    #[error("close hook '{name}' failed: {reason}")]
    CloseHook {
        /// The hook name.
        name: String,
        /// Why it failed.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::ClusterJoin(_) => "cluster_join",
            RuntimeError::NotClustered => "not_clustered",
            RuntimeError::Closed(_) => "closed",
            RuntimeError::Worker(_) => "worker",
            RuntimeError::CloseHook { .. } => "close_hook",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// A hook run once when the runtime closes.
pub type CloseHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), RuntimeError>> + Send>;

/// Constructors for runtime handles.
#[derive(Debug)]
pub struct Runtime;

impl Runtime {
    /// Creates a standalone runtime handle.
    ///
    /// Any cluster options are ignored.
    #[must_use]
    pub fn standalone(mut options: RuntimeOptions) -> RuntimeHandle {
        options.cluster = None;
        RuntimeHandle::new(options, None)
    }

    /// Creates a clustered runtime handle, joining the configured cluster.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotClustered`] without cluster options, or
    /// [`RuntimeError::ClusterJoin`] if the join fails.
    pub async fn clustered(options: RuntimeOptions) -> Result<RuntimeHandle, RuntimeError> {
        let cluster = options.cluster.clone().ok_or(RuntimeError::NotClustered)?;
        let bind = ClusterBind {
            port: cluster.port,
            host: cluster.host.clone(),
        };
        cluster
            .manager
            .join(&bind)
            .await
            .map_err(RuntimeError::ClusterJoin)?;
        tracing::info!(node = cluster.manager.node_id(), port = cluster.port, host = ?cluster.host, "joined cluster");
        Ok(RuntimeHandle::new(options, Some(cluster.manager)))
    }

    /// Creates a clustered handle when cluster options are present, a standalone one otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`clustered`](Self::clustered).
    pub async fn create(options: RuntimeOptions) -> Result<RuntimeHandle, RuntimeError> {
        if options.cluster.is_some() {
            Self::clustered(options).await
        } else {
            Ok(Self::standalone(options))
        }
    }
}

struct RuntimeInner {
    id: RuntimeId,
    options: RuntimeOptions,
    cluster: Option<Arc<dyn ClusterManager>>,
    bus: EventBus,
    shared: SharedData,
    workers: Arc<Semaphore>,
    close_hooks: Mutex<Vec<(String, CloseHook)>>,
    deployments: Deployments,
    shutdown: CancellationToken,
    closing: AtomicBool,
    closed: OnceCell<()>,
}

/// Cheaply cloneable handle to a runtime.
///
/// Equality and hashing use the [`RuntimeId`], so handles can key maps.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.inner.id)
            .field("clustered", &self.is_clustered())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for RuntimeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for RuntimeHandle {}

impl core::hash::Hash for RuntimeHandle {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl RuntimeHandle {
    fn new(options: RuntimeOptions, cluster: Option<Arc<dyn ClusterManager>>) -> Self {
        let id = RuntimeId::new();
        let workers = Arc::new(Semaphore::new(options.worker_pool_size.max(1)));
        tracing::debug!(runtime = %id, clustered = cluster.is_some(), "runtime created");
        Self {
            inner: Arc::new(RuntimeInner {
                id,
                shared: SharedData::new(cluster.clone()),
                cluster,
                options,
                bus: EventBus::new(),
                workers,
                close_hooks: Mutex::new(Vec::new()),
                deployments: Deployments::default(),
                shutdown: CancellationToken::new(),
                closing: AtomicBool::new(false),
                closed: OnceCell::new(),
            }),
        }
    }

    /// Returns the runtime id.
    #[must_use]
    pub fn id(&self) -> &RuntimeId {
        &self.inner.id
    }

    /// Returns the options the runtime was created with.
    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    /// Returns the event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Returns the shared data accessor.
    #[must_use]
    pub fn shared_data(&self) -> &SharedData {
        &self.inner.shared
    }

    /// Returns the cluster manager of a clustered runtime.
    #[must_use]
    pub fn cluster_manager(&self) -> Option<&Arc<dyn ClusterManager>> {
        self.inner.cluster.as_ref()
    }

    /// Returns true if the runtime joined a cluster.
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        self.inner.cluster.is_some()
    }

    /// Returns a token cancelled as soon as closing starts.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            Err(RuntimeError::Closed(self.inner.id.clone()))
        } else {
            Ok(())
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Worker pool
    // ─────────────────────────────────────────────────────────────────────

    /// Runs blocking work on the worker pool and awaits its result.
    ///
    /// At most `worker_pool_size` closures run at once.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Worker`] if the closure panicked.
    pub async fn execute_blocking<F, T>(&self, work: F) -> Result<T, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.inner.workers)
            .acquire_owned()
            .await
            .map_err(|_| RuntimeError::Closed(self.inner.id.clone()))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|err| RuntimeError::Worker(err.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Deployments
    // ─────────────────────────────────────────────────────────────────────

    /// Creates `options.instances` verticles through `factory` and starts them.
    ///
    /// Instances start concurrently. If any fails, the started ones are
    /// stopped again and the deployment is not recorded.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::RuntimeClosed`] after close,
    /// [`DeploymentError::NoInstances`] for zero instances,
    /// [`DeploymentError::Create`] if the factory fails, or
    /// [`DeploymentError::Start`] if an instance fails to start.
    pub async fn deploy_verticle(
        &self,
        factory: VerticleFactory,
        options: DeploymentOptions,
    ) -> Result<DeploymentId, DeploymentError> {
        self.ensure_open()
            .map_err(|_| DeploymentError::RuntimeClosed(self.inner.id.clone()))?;
        if options.instances == 0 {
            return Err(DeploymentError::NoInstances);
        }

        let id = DeploymentId::new();
        let config = Arc::new(options.config);
        let cancellation = self.inner.shutdown.child_token();

        let mut instances = Vec::with_capacity(options.instances);
        for index in 0..options.instances {
            let verticle = factory(&config).map_err(DeploymentError::Create)?;
            let ctx = VerticleContext::new(
                self.clone(),
                id.clone(),
                index,
                Arc::clone(&config),
                cancellation.clone(),
            );
            instances.push((verticle, ctx));
        }
        let name = instances
            .first()
            .map(|(verticle, _)| verticle.name().to_string())
            .unwrap_or_default();

        let results = futures::future::join_all(
            instances.iter().map(|(verticle, ctx)| verticle.start(ctx)),
        )
        .await;

        let mut started = Vec::with_capacity(instances.len());
        let mut failure = None;
        for (instance, result) in instances.into_iter().zip(results) {
            match result {
                Ok(()) => started.push(instance),
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }

        let deployment = LiveDeployment {
            name: name.clone(),
            instances: started,
            cancellation,
        };

        if let Some(source) = failure {
            for reason in deployment.stop().await {
                tracing::warn!(verticle = %name, reason = %reason, "failed to stop instance after a sibling failed to start");
            }
            tracing::warn!(verticle = %name, error = %source, "deployment failed");
            return Err(DeploymentError::Start {
                verticle: name,
                source,
            });
        }

        // Under the close-hook lock so `run_close` sees every inserted deployment.
        let rejected = {
            let _hooks = self.inner.close_hooks.lock();
            if self.inner.closing.load(Ordering::SeqCst) {
                Some(deployment)
            } else {
                self.inner.deployments.insert(id.clone(), deployment);
                None
            }
        };
        if let Some(deployment) = rejected {
            deployment.stop().await;
            return Err(DeploymentError::RuntimeClosed(self.inner.id.clone()));
        }

        tracing::debug!(deployment = %id, verticle = %name, instances = options.instances, "deployed verticle");
        Ok(id)
    }

    /// Stops every instance of a deployment and forgets it.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::UnknownDeployment`] if `id` is not live, or
    /// [`DeploymentError::Undeploy`] if some instances failed to stop.
    pub async fn undeploy(&self, id: &DeploymentId) -> Result<(), DeploymentError> {
        let deployment = self
            .inner
            .deployments
            .remove(id)
            .ok_or_else(|| DeploymentError::UnknownDeployment(id.clone()))?;
        let name = deployment.name.clone();
        let failures = deployment.stop().await;
        if failures.is_empty() {
            tracing::debug!(deployment = %id, verticle = %name, "undeployed verticle");
            Ok(())
        } else {
            Err(DeploymentError::Undeploy {
                deployment: id.clone(),
                failures,
            })
        }
    }

    /// Returns the ids of all live deployments in deployment order.
    #[must_use]
    pub fn deployment_ids(&self) -> Vec<DeploymentId> {
        self.inner.deployments.ids()
    }

    /// Returns the verticle name of a live deployment.
    #[must_use]
    pub fn deployment_name(&self, id: &DeploymentId) -> Option<String> {
        self.inner.deployments.name_of(id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Closing
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a hook run once when the runtime closes.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if closing already started.
    pub fn add_close_hook<F>(&self, name: impl Into<String>, hook: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<(), RuntimeError>> + Send + 'static,
    {
        let mut hooks = self.inner.close_hooks.lock();
        self.ensure_open()?;
        hooks.push((name.into(), Box::new(hook)));
        Ok(())
    }

    /// Closes the runtime.
    ///
    /// Idempotent: the first call performs the close, every other call
    /// (concurrent or later) awaits that same execution. A call made from a
    /// close hook of this runtime, or from anything such a hook awaits on the
    /// same task, returns immediately.
    pub async fn close(&self) {
        let mut closing = CLOSING.try_with(Vec::clone).unwrap_or_default();
        if closing.contains(&self.inner.id) {
            tracing::debug!(runtime = %self.inner.id, "close requested while closing, ignoring");
            return;
        }
        closing.push(self.inner.id.clone());
        self.inner
            .closed
            .get_or_init(|| CLOSING.scope(closing, self.run_close()))
            .await;
    }

    /// Returns true once closing started.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Returns true once closing completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.initialized()
    }

    async fn run_close(&self) {
        let id = &self.inner.id;
        let hooks = {
            let mut hooks = self.inner.close_hooks.lock();
            self.inner.closing.store(true, Ordering::SeqCst);
            core::mem::take(&mut *hooks)
        };
        self.inner.shutdown.cancel();
        tracing::debug!(runtime = %id, hooks = hooks.len(), "closing runtime");

        for (name, hook) in hooks.into_iter().rev() {
            if let Err(err) = hook().await {
                tracing::warn!(runtime = %id, hook = %name, error = %err, "close hook failed");
            }
        }

        for deployment in self.inner.deployments.ids().into_iter().rev() {
            if let Err(err) = self.undeploy(&deployment).await {
                tracing::warn!(runtime = %id, deployment = %deployment, error = %err, "undeploy on close failed");
            }
        }

        if let Some(cluster) = &self.inner.cluster {
            if let Err(err) = cluster.leave().await {
                tracing::warn!(runtime = %id, error = %err, "failed to leave cluster");
            }
        }

        tracing::info!(runtime = %id, "runtime closed");
    }
}
