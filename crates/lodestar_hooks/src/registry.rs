//! The hook registry.

use core::panic::AssertUnwindSafe;

use futures::FutureExt;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::context::{CorrelationId, HookContext};
use crate::outcome::{HookOutcome, HookResult};
use crate::phase::{IntoPhaseIds, Phase, PhaseId};
use crate::source::{HookDefinition, HookHandler, HookSource};
use crate::{HookError, HookRegistrationError};

/// A recorded (phase, hook, correlation id) registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRegistration {
    /// The phase the hook runs in.
    pub phase: PhaseId,
    /// The hook name, unique per phase.
    pub name: String,
    /// Correlation id of the registering operation.
    pub correlation_id: CorrelationId,
}

struct HookEntry {
    name: String,
    correlation_id: CorrelationId,
    handler: HookHandler,
}

/// Registry of lifecycle hooks, organized by phase.
///
/// # Thread Safety
///
/// The registry uses interior mutability via [`RwLock`]. No lock is held while
/// hooks run, so hooks may register further hooks.
///
/// # Ordering
///
/// Hooks of one phase run concurrently. Registration order is kept for
/// reporting, but it depends on the order sources were discovered in and is
/// not an execution order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<PhaseId, Vec<HookEntry>>>,
}

impl core::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let hooks = self.hooks.read();
        f.debug_map()
            .entries(hooks.iter().map(|(phase, entries)| (phase.name(), entries.len())))
            .finish()
    }
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every hook of `source`, one registration per (hook, phase) pair.
    ///
    /// A failing registration does not prevent the others. If the source
    /// cannot enumerate its hooks, the result holds a single
    /// [`HookRegistrationError::Source`].
    pub fn register_hooks(
        &self,
        source: &dyn HookSource,
        correlation_id: &CorrelationId,
    ) -> Vec<Result<HookRegistration, HookRegistrationError>> {
        let definitions = match source.hooks() {
            Ok(definitions) => definitions,
            Err(err) => {
                return vec![Err(HookRegistrationError::Source {
                    source_name: source.name().to_string(),
                    reason: err.to_string(),
                })];
            }
        };

        let mut results = Vec::new();
        for definition in &definitions {
            results.extend(self.register_definition(definition, correlation_id));
        }
        tracing::debug!(
            correlation_id = %correlation_id,
            source = source.name(),
            registrations = results.iter().filter(|r| r.is_ok()).count(),
            "registered hook source"
        );
        results
    }

    /// Registers `definition` for each of its phases.
    pub fn register_definition(
        &self,
        definition: &HookDefinition,
        correlation_id: &CorrelationId,
    ) -> Vec<Result<HookRegistration, HookRegistrationError>> {
        definition
            .phases()
            .iter()
            .map(|phase| {
                self.register_boxed(
                    *phase,
                    definition.name(),
                    correlation_id,
                    definition.handler().clone(),
                )
            })
            .collect()
    }

    /// Registers a hook callable for one or more phases.
    ///
    /// # Errors
    ///
    /// Returns [`HookRegistrationError::DuplicateName`] if one of the phases
    /// already has a hook with this name. Phases before the failing one stay
    /// registered.
    pub fn register<P, F>(
        &self,
        name: impl Into<String>,
        correlation_id: &CorrelationId,
        handler: F,
    ) -> Result<Vec<HookRegistration>, HookRegistrationError>
    where
        P: IntoPhaseIds,
        F: Fn(HookContext) -> lodestar_runtime::BoxFuture<'static, Result<(), HookError>>
            + Send
            + Sync
            + 'static,
    {
        let definition = HookDefinition::new::<P, F>(name, handler);
        self.register_definition(&definition, correlation_id)
            .into_iter()
            .collect()
    }

    /// Registers a pre-built handler for a single phase.
    ///
    /// # Errors
    ///
    /// Returns [`HookRegistrationError::DuplicateName`] if the phase already
    /// has a hook with this name.
    pub fn register_boxed(
        &self,
        phase: PhaseId,
        name: impl Into<String>,
        correlation_id: &CorrelationId,
        handler: HookHandler,
    ) -> Result<HookRegistration, HookRegistrationError> {
        let name = name.into();

        let mut hooks = self.hooks.write();
        let entries = hooks.entry(phase).or_default();
        if entries.iter().any(|entry| entry.name == name) {
            return Err(HookRegistrationError::DuplicateName { phase, name });
        }

        entries.push(HookEntry {
            name: name.clone(),
            correlation_id: correlation_id.clone(),
            handler,
        });
        Ok(HookRegistration {
            phase,
            name,
            correlation_id: correlation_id.clone(),
        })
    }

    /// Runs every hook registered for the context's phase.
    ///
    /// Hooks run concurrently and all of them run; a failing or panicking hook
    /// is reported in the outcome without affecting the others.
    pub async fn execute_hooks(&self, context: HookContext) -> HookOutcome {
        let phase = context.phase();
        let entries: Vec<(String, CorrelationId, HookHandler)> = self
            .hooks
            .read()
            .get(&phase)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        (
                            entry.name.clone(),
                            entry.correlation_id.clone(),
                            entry.handler.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let runs = entries.iter().map(|(name, _, handler)| {
            let context = context.clone();
            let name = name.clone();
            async move {
                let future = std::panic::catch_unwind(AssertUnwindSafe(|| handler(context)))
                    .map_err(|panic| HookError::Panicked {
                        hook: name.clone(),
                        message: panic_message(panic.as_ref()),
                    })?;
                AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(HookError::Panicked {
                            hook: name,
                            message: panic_message(panic.as_ref()),
                        })
                    })
            }
        });
        let results = futures::future::join_all(runs).await;

        let results: Vec<HookResult> = entries
            .into_iter()
            .zip(results)
            .map(|((name, correlation_id, _), result)| HookResult {
                name,
                correlation_id,
                result,
            })
            .collect();
        let outcome = HookOutcome::new(phase, results);
        tracing::debug!(
            correlation_id = %context.correlation_id(),
            phase = phase.name(),
            hooks = outcome.len(),
            failed = outcome.failed(),
            "executed hooks"
        );
        outcome
    }

    /// Runs every hook of phase `P` with an empty payload.
    pub async fn execute<P: Phase>(&self, correlation_id: CorrelationId) -> HookOutcome {
        self.execute_hooks(HookContext::of::<P>(correlation_id))
            .await
    }

    /// Returns the number of hooks registered for `phase`.
    #[must_use]
    pub fn hook_count(&self, phase: PhaseId) -> usize {
        self.hooks.read().get(&phase).map_or(0, Vec::len)
    }

    /// Checks if a hook with the given name exists for `phase`.
    #[must_use]
    pub fn contains_hook(&self, phase: PhaseId, name: &str) -> bool {
        self.hooks
            .read()
            .get(&phase)
            .is_some_and(|entries| entries.iter().any(|entry| entry.name == name))
    }

    /// Returns the registrations of `phase` in registration order.
    #[must_use]
    pub fn registrations(&self, phase: PhaseId) -> Vec<HookRegistration> {
        self.hooks
            .read()
            .get(&phase)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| HookRegistration {
                        phase,
                        name: entry.name.clone(),
                        correlation_id: entry.correlation_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn panic_message(panic: &(dyn core::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{AfterStartup, BeforeBootstrap, BeforeShutdown};
    use crate::source::StaticHookSource;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn corr() -> CorrelationId {
        CorrelationId::new("test")
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(HookContext) -> lodestar_runtime::BoxFuture<'static, Result<(), HookError>> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_ctx| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[test]
    fn register_increments_count() {
        let registry = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .register::<BeforeBootstrap, _>("first", &corr(), counting(&counter))
            .expect("registration should succeed");
        registry
            .register::<BeforeBootstrap, _>("second", &corr(), counting(&counter))
            .expect("registration should succeed");

        assert_eq!(registry.hook_count(PhaseId::of::<BeforeBootstrap>()), 2);
        assert!(registry.contains_hook(PhaseId::of::<BeforeBootstrap>(), "first"));
        assert!(!registry.contains_hook(PhaseId::of::<AfterStartup>(), "first"));
    }

    #[test]
    fn duplicate_name_per_phase_is_rejected() {
        let registry = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .register::<BeforeBootstrap, _>("hook", &corr(), counting(&counter))
            .expect("registration should succeed");
        let err = registry
            .register::<BeforeBootstrap, _>("hook", &corr(), counting(&counter))
            .unwrap_err();
        assert!(matches!(err, HookRegistrationError::DuplicateName { .. }));

        // same name on another phase is fine
        registry
            .register::<AfterStartup, _>("hook", &corr(), counting(&counter))
            .expect("registration should succeed");
    }

    #[test]
    fn multi_phase_definition_registers_each_phase() {
        let registry = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let registrations = registry
            .register::<(BeforeBootstrap, BeforeShutdown), _>("both", &corr(), counting(&counter))
            .expect("registration should succeed");

        assert_eq!(registrations.len(), 2);
        assert_eq!(registry.registrations(PhaseId::of::<BeforeShutdown>())[0].name, "both");
    }

    #[test]
    fn failing_source_reports_single_error() {
        let source = StaticHookSource::new("broken", || {
            Err(HookError::Source {
                source_name: "broken".to_string(),
                reason: "cannot enumerate".to_string(),
            })
        });
        let results = HookRegistry::new().register_hooks(&source, &corr());
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(HookRegistrationError::Source { .. })));
    }

    #[tokio::test]
    async fn execute_runs_only_hooks_of_the_phase() {
        let registry = HookRegistry::new();
        let startup = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicUsize::new(0));

        registry
            .register::<AfterStartup, _>("startup", &corr(), counting(&startup))
            .expect("registration should succeed");
        registry
            .register::<BeforeShutdown, _>("shutdown", &corr(), counting(&shutdown))
            .expect("registration should succeed");

        let outcome = registry.execute::<AfterStartup>(corr()).await;
        assert_eq!(outcome.len(), 1);
        assert!(outcome.is_success());
        assert_eq!(startup.load(Ordering::SeqCst), 1);
        assert_eq!(shutdown.load(Ordering::SeqCst), 0);

        let outcome = registry.execute::<BeforeBootstrap>(corr()).await;
        assert!(outcome.is_empty());
    }

    async fn explode() -> Result<(), HookError> {
        panic!("inside future")
    }

    #[tokio::test]
    async fn panicking_hook_is_reported_as_failure() {
        let registry = HookRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry
            .register::<AfterStartup, _>("sync-panic", &corr(), |_ctx| panic!("before future"))
            .expect("registration should succeed");
        registry
            .register::<AfterStartup, _>("async-panic", &corr(), |_ctx| Box::pin(explode()))
            .expect("registration should succeed");
        registry
            .register::<AfterStartup, _>("fine", &corr(), counting(&counter))
            .expect("registration should succeed");

        let outcome = registry.execute::<AfterStartup>(corr()).await;
        assert_eq!(outcome.failed(), 2);
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(outcome
            .failures()
            .all(|(_, err)| err.as_label() == "panicked"));
    }
}
