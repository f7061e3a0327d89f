//! Hook definitions and hook-bearing sources.

use core::fmt;
use std::sync::Arc;

use lodestar_runtime::BoxFuture;

use crate::HookError;
use crate::context::HookContext;
use crate::phase::{IntoPhaseIds, PhaseId};

/// The callable behind a hook.
pub type HookHandler =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// A named hook callable together with the phases it runs in.
#[derive(Clone)]
pub struct HookDefinition {
    name: String,
    phases: Vec<PhaseId>,
    handler: HookHandler,
}

impl fmt::Debug for HookDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDefinition")
            .field("name", &self.name)
            .field("phases", &self.phases)
            .finish_non_exhaustive()
    }
}

impl HookDefinition {
    /// Defines a hook for one or more phases.
    ///
    /// # Example
    ///
    /// ```
    /// use lodestar_hooks::prelude::*;
    ///
    /// let hook = HookDefinition::new::<(BeforeBootstrap, AfterStartup), _>("audit", |ctx| {
    ///     Box::pin(async move {
    ///         tracing::info!(phase = %ctx.phase(), "audit");
    ///         Ok(())
    ///     })
    /// });
    /// assert_eq!(hook.phases().len(), 2);
    /// ```
    #[must_use]
    pub fn new<P, F>(name: impl Into<String>, handler: F) -> Self
    where
        P: IntoPhaseIds,
        F: Fn(HookContext) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            phases: P::phase_ids(),
            handler: Arc::new(handler),
        }
    }

    /// Returns the hook name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the phases the hook runs in.
    #[must_use]
    pub fn phases(&self) -> &[PhaseId] {
        &self.phases
    }

    pub(crate) fn handler(&self) -> &HookHandler {
        &self.handler
    }
}

/// A hook-bearing type.
///
/// Sources hand out static callables; registering a source never constructs
/// an object on its behalf.
pub trait HookSource: Send + Sync {
    /// Returns the source name used in logs and errors.
    fn name(&self) -> &str;

    /// Enumerates the hooks of this source.
    ///
    /// # Errors
    ///
    /// Returns a [`HookError`] if the source cannot describe its hooks.
    fn hooks(&self) -> Result<Vec<HookDefinition>, HookError>;
}

/// A [`HookSource`] backed by a plain function, constructible in `const` context.
#[derive(Debug, Clone, Copy)]
pub struct StaticHookSource {
    name: &'static str,
    hooks: fn() -> Result<Vec<HookDefinition>, HookError>,
}

impl StaticHookSource {
    /// Creates a source named `name` whose hooks come from `hooks`.
    #[must_use]
    pub const fn new(name: &'static str, hooks: fn() -> Result<Vec<HookDefinition>, HookError>) -> Self {
        Self { name, hooks }
    }
}

impl HookSource for StaticHookSource {
    fn name(&self) -> &str {
        self.name
    }

    fn hooks(&self) -> Result<Vec<HookDefinition>, HookError> {
        (self.hooks)()
    }
}
