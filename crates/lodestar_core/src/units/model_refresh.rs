//! Announces changes to the models directory.

use core::time::Duration;
use std::path::PathBuf;

use async_trait::async_trait;
use lodestar_runtime::verticle::{Verticle, VerticleContext, VerticleError};
use serde_json::json;

use super::watch::{DirectoryWatch, Snapshot, ensure_directory, scan_on_worker};

/// Bus address on which model changes are published.
pub const MODELS_CHANGED_ADDRESS: &str = "lodestar.models.changed";

/// Watches the models directory and publishes a JSON notice on every change.
///
/// Changes are grouped until the directory stays quiet for the settle
/// interval, then the directory is rescanned. The notice is
/// `{ "directory": "...", "files": ["...", ...] }` listing every
/// model file after the change.
#[derive(Debug, Clone)]
pub struct ModelRefreshVerticle {
    directory: PathBuf,
    settle: Duration,
}

impl ModelRefreshVerticle {
    /// Watches `directory`, rescanning once changes settled for `settle`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, settle: Duration) -> Self {
        Self {
            directory: directory.into(),
            settle,
        }
    }
}

#[async_trait]
impl Verticle for ModelRefreshVerticle {
    fn name(&self) -> &str {
        "ModelRefreshVerticle"
    }

    async fn start(&self, ctx: &VerticleContext) -> Result<(), VerticleError> {
        let handle = ctx.runtime().clone();
        ensure_directory(&handle, &self.directory, self.name()).await?;
        let mut watch = DirectoryWatch::start(&self.directory, self.name())?;
        let mut last: Snapshot = scan_on_worker(&handle, &self.directory, None).await?;

        let directory = self.directory.clone();
        let settle = self.settle;
        let cancellation = ctx.cancellation().clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancellation.cancelled() => break,
                    batch = watch.next_batch(settle) => {
                        if batch.is_none() {
                            tracing::warn!(directory = %directory.display(), "models watcher stopped");
                            break;
                        }
                    }
                }
                let current = match scan_on_worker(&handle, &directory, None).await {
                    Ok(current) => current,
                    Err(err) => {
                        tracing::warn!(directory = %directory.display(), error = %err, "failed to scan models");
                        continue;
                    }
                };
                if current == last {
                    continue;
                }
                let files: Vec<String> = current.keys().map(|p| p.display().to_string()).collect();
                let notice = json!({ "directory": directory.display().to_string(), "files": files });
                match handle.event_bus().publish(MODELS_CHANGED_ADDRESS, notice) {
                    Ok(receivers) => tracing::info!(models = current.len(), receivers, "models changed"),
                    Err(err) => tracing::warn!(error = %err, "failed to publish model change"),
                }
                last = current;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_runtime::runtime::{Runtime, RuntimeOptions};
    use lodestar_runtime::verticle::{DeploymentOptions, VerticleFactory};
    use serde_json::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn publishes_when_a_model_appears() {
        let dir = tempfile::tempdir().expect("temp dir");
        let models = dir.path().join("models");
        let handle = Runtime::standalone(RuntimeOptions::default());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        let _consumer = handle.event_bus().consumer(MODELS_CHANGED_ADDRESS, move |msg| {
            if let Some(body) = msg.body::<Value>() {
                let _ = tx.send(body.clone());
            }
        });

        let unit = ModelRefreshVerticle::new(&models, Duration::from_millis(20));
        let factory: VerticleFactory = Arc::new(
            move |_config: &Value| -> Result<Arc<dyn Verticle>, VerticleError> {
                Ok(Arc::new(unit.clone()))
            },
        );
        handle
            .deploy_verticle(factory, DeploymentOptions::default())
            .await
            .expect("deploy");
        assert!(models.is_dir(), "start should create the directory");

        std::fs::write(models.join("orders.csn"), "{}").expect("write");
        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("a notice should arrive")
            .expect("channel open");
        assert_eq!(notice["files"].as_array().map(Vec::len), Some(1));

        handle.close().await;
    }
}
