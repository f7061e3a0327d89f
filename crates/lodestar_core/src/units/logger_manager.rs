//! Serves log filter changes over the event bus.

use async_trait::async_trait;
use lodestar_runtime::bus::{ConsumerRegistration, Message};
use lodestar_runtime::verticle::{Verticle, VerticleContext, VerticleError};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::logging::LogControl;

/// Bus address of the logger manager.
pub const LOGGER_MANAGER_ADDRESS: &str = "lodestar.loggerManager";

/// A request to the logger manager, sent as a JSON body.
///
/// ```json
/// { "action": "set", "filter": "lodestar_core=debug" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LoggerCommand {
    /// Returns the active filter.
    Get,
    /// Replaces the active filter.
    Set {
        /// The new filter directives.
        filter: String,
    },
}

/// Answers [`LoggerCommand`]s on [`LOGGER_MANAGER_ADDRESS`].
///
/// Every reply is `{ "filter": "<active directives>" }`.
pub struct LoggerManagerVerticle {
    control: LogControl,
    registrations: Mutex<Vec<ConsumerRegistration>>,
}

impl core::fmt::Debug for LoggerManagerVerticle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoggerManagerVerticle")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl LoggerManagerVerticle {
    /// Creates the unit around `control`.
    #[must_use]
    pub fn new(control: LogControl) -> Self {
        Self {
            control,
            registrations: Mutex::new(Vec::new()),
        }
    }
}

fn handle(control: &LogControl, mut message: Message) {
    let command = message
        .body::<Value>()
        .cloned()
        .ok_or_else(|| format!("expected a JSON body, got {}", message.body_type()))
        .and_then(|body| serde_json::from_value::<LoggerCommand>(body).map_err(|err| err.to_string()));

    let outcome = command.and_then(|command| match command {
        LoggerCommand::Get => Ok(()),
        LoggerCommand::Set { filter } => control.set_filter(&filter).map_err(|err| err.to_string()),
    });

    match outcome {
        Ok(()) => {
            message.reply(json!({ "filter": control.current_filter() }));
        }
        Err(reason) => {
            tracing::warn!(reason = %reason, "rejected logger command");
            message.fail(reason);
        }
    }
}

#[async_trait]
impl Verticle for LoggerManagerVerticle {
    fn name(&self) -> &str {
        "LoggerManagerVerticle"
    }

    async fn start(&self, ctx: &VerticleContext) -> Result<(), VerticleError> {
        let control = self.control.clone();
        let registration = ctx
            .runtime()
            .event_bus()
            .consumer(LOGGER_MANAGER_ADDRESS, move |message| handle(&control, message));
        self.registrations.lock().push(registration);
        Ok(())
    }

    async fn stop(&self, _ctx: &VerticleContext) -> Result<(), VerticleError> {
        for registration in self.registrations.lock().drain(..) {
            registration.unregister();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_runtime::bus::BusError;
    use lodestar_runtime::runtime::{Runtime, RuntimeOptions};
    use lodestar_runtime::verticle::{DeploymentOptions, VerticleFactory};
    use std::sync::Arc;

    #[tokio::test]
    async fn get_and_set_filter_over_the_bus() {
        let handle = Runtime::standalone(RuntimeOptions::default());
        let control = LogControl::detached("info");
        let unit_control = control.clone();
        let factory: VerticleFactory = Arc::new(
            move |_config: &Value| -> Result<Arc<dyn Verticle>, VerticleError> {
                Ok(Arc::new(LoggerManagerVerticle::new(unit_control.clone())))
            },
        );
        let id = handle
            .deploy_verticle(factory, DeploymentOptions::default())
            .await
            .expect("deploy");
        let bus = handle.event_bus();

        let reply: Value = bus
            .request(LOGGER_MANAGER_ADDRESS, json!({"action": "get"}))
            .await
            .expect("get should succeed");
        assert_eq!(reply, json!({"filter": "info"}));

        let reply: Value = bus
            .request(LOGGER_MANAGER_ADDRESS, json!({"action": "set", "filter": "lodestar_core=debug"}))
            .await
            .expect("set should succeed");
        assert_eq!(reply, json!({"filter": "lodestar_core=debug"}));
        assert_eq!(control.current_filter(), "lodestar_core=debug");

        let err = bus
            .request::<_, Value>(LOGGER_MANAGER_ADDRESS, json!({"action": "explode"}))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ReplyFailure { .. }));

        handle.undeploy(&id).await.expect("undeploy");
        assert_eq!(bus.consumer_count(LOGGER_MANAGER_ADDRESS), 0);
        handle.close().await;
    }
}
