//! Deploys units described by files in the verticles directory.

use core::time::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use lodestar_hooks::context::CorrelationId;
use lodestar_runtime::runtime::RuntimeHandle;
use lodestar_runtime::verticle::{Verticle, VerticleContext, VerticleError, VerticleFactories};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use super::watch::{DirectoryWatch, Snapshot, ensure_directory, has_extension, scan_on_worker};
use crate::deployable::{Deployable, Deployment};

/// Content of a `*.json` unit descriptor.
///
/// ```json
/// { "verticle": "reports", "options": { "instances": 2, "config": {} } }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDescriptor {
    /// Name of the unit in the verticle factories.
    pub verticle: String,
    /// Deployment options, `{ "instances": n, "config": {...} }`.
    #[serde(default)]
    pub options: Value,
}

const DESCRIPTOR_EXTENSION: &str = "json";

struct DeployerState {
    directory: PathBuf,
    factories: VerticleFactories,
    deployed: Mutex<HashMap<PathBuf, Deployment>>,
    seen: Mutex<Snapshot>,
}

impl DeployerState {
    async fn sync(&self, handle: &RuntimeHandle) {
        let current = match scan_on_worker(handle, &self.directory, Some(DESCRIPTOR_EXTENSION)).await {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(directory = %self.directory.display(), error = %err, "failed to scan unit descriptors");
                return;
            }
        };
        let previous = core::mem::replace(&mut *self.seen.lock(), current.clone());

        for path in previous.keys().filter(|path| !current.contains_key(*path)) {
            self.retire(path).await;
        }
        for (path, modified) in &current {
            if previous.get(path) == Some(modified) {
                continue;
            }
            self.retire(path).await;
            self.deploy(handle, path).await;
        }
    }

    async fn retire(&self, path: &Path) {
        let deployment = self.deployed.lock().remove(path);
        if let Some(deployment) = deployment {
            match deployment.undeploy().await {
                Ok(()) => tracing::info!(descriptor = %path.display(), unit = deployment.name(), "undeployed unit"),
                Err(err) => tracing::warn!(descriptor = %path.display(), error = %err, "failed to undeploy unit"),
            }
        }
    }

    async fn deploy(&self, handle: &RuntimeHandle, path: &Path) {
        let correlation_id = CorrelationId::new(format!("Deployer-{}", nanoid::nanoid!(8)));
        let deployable = match self.read_descriptor(handle, path).await {
            Ok(deployable) => deployable,
            Err(reason) => {
                tracing::warn!(correlation_id = %correlation_id, descriptor = %path.display(), reason = %reason, "skipping unit descriptor");
                return;
            }
        };
        if let Ok(deployment) = deployable.deploy(handle, &correlation_id).await {
            self.deployed.lock().insert(path.to_path_buf(), deployment);
        }
    }

    async fn read_descriptor(&self, handle: &RuntimeHandle, path: &Path) -> Result<Deployable, String> {
        let file = path.to_path_buf();
        let raw = handle
            .execute_blocking(move || std::fs::read_to_string(&file))
            .await
            .map_err(|err| err.to_string())?
            .map_err(|err| err.to_string())?;
        let descriptor: UnitDescriptor = serde_json::from_str(&raw).map_err(|err| err.to_string())?;
        Deployable::from_name(
            &self.factories,
            &descriptor.verticle,
            &CorrelationId::new(path.display().to_string()),
            descriptor.options,
        )
        .map_err(|err| err.to_string())
    }

    async fn retire_all(&self) {
        let deployments: Vec<(PathBuf, Deployment)> = self.deployed.lock().drain().collect();
        for (path, deployment) in deployments {
            if let Err(err) = deployment.undeploy().await {
                tracing::debug!(descriptor = %path.display(), error = %err, "unit already gone");
            }
        }
    }
}

/// Watches the verticles directory for `*.json` [`UnitDescriptor`]s.
///
/// A new descriptor deploys its unit through the verticle factories, a changed
/// descriptor redeploys it and a removed descriptor undeploys it. Descriptors
/// present at start are deployed right away.
pub struct DeployerVerticle {
    state: Arc<DeployerState>,
    settle: Duration,
}

impl core::fmt::Debug for DeployerVerticle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeployerVerticle")
            .field("directory", &self.state.directory)
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl DeployerVerticle {
    /// Watches `directory`, syncing once changes settled for `settle` and
    /// creating units from `factories`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, settle: Duration, factories: VerticleFactories) -> Self {
        Self {
            state: Arc::new(DeployerState {
                directory: directory.into(),
                factories,
                deployed: Mutex::new(HashMap::new()),
                seen: Mutex::new(Snapshot::new()),
            }),
            settle,
        }
    }

    /// Returns the number of units deployed from descriptors.
    #[must_use]
    pub fn deployed_count(&self) -> usize {
        self.state.deployed.lock().len()
    }
}

#[async_trait]
impl Verticle for DeployerVerticle {
    fn name(&self) -> &str {
        "DeployerVerticle"
    }

    async fn start(&self, ctx: &VerticleContext) -> Result<(), VerticleError> {
        let handle = ctx.runtime().clone();
        ensure_directory(&handle, &self.state.directory, self.name()).await?;
        let mut watch = DirectoryWatch::start(&self.state.directory, self.name())?;

        let state = Arc::clone(&self.state);
        let settle = self.settle;
        let cancellation = ctx.cancellation().clone();
        tokio::spawn(async move {
            state.sync(&handle).await;
            loop {
                let batch = tokio::select! {
                    () = cancellation.cancelled() => break,
                    batch = watch.next_batch(settle) => batch,
                };
                let Some(touched) = batch else {
                    tracing::warn!(directory = %state.directory.display(), "descriptor watcher stopped");
                    break;
                };
                if touched.iter().any(|path| has_extension(path, Some(DESCRIPTOR_EXTENSION))) {
                    state.sync(&handle).await;
                }
            }
        });
        Ok(())
    }

    async fn stop(&self, _ctx: &VerticleContext) -> Result<(), VerticleError> {
        self.state.retire_all().await;
        Ok(())
    }
}
