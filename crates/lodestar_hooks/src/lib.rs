//! Lifecycle phases and hook execution for Lodestar (Layer 2).
//!
//! Hooks are named callables registered against lifecycle [phases](phase).
//! When a phase executes, every hook registered for it runs concurrently and
//! the [`HookOutcome`](outcome::HookOutcome) reports each result; one failing
//! hook never prevents the others from running.
//!
//! # Core Types
//!
//! - [`phase`] - Phase markers: [`BeforeBootstrap`](phase::BeforeBootstrap),
//!   [`AfterStartup`](phase::AfterStartup), [`BeforeShutdown`](phase::BeforeShutdown),
//!   [`OncePerRequest`](phase::OncePerRequest)
//! - [`HookSource`](source::HookSource) - A hook-bearing type, enumerating its
//!   [`HookDefinition`](source::HookDefinition)s
//! - [`HookRegistry`](registry::HookRegistry) - Registration and execution
//!
//! # Example
//!
//! ```
//! use lodestar_hooks::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = HookRegistry::new();
//! let correlation_id = CorrelationId::new("example");
//!
//! registry
//!     .register::<AfterStartup, _>("announce", &correlation_id, |ctx| {
//!         Box::pin(async move {
//!             tracing::info!(correlation_id = %ctx.correlation_id(), "started");
//!             Ok(())
//!         })
//!     })
//!     .unwrap();
//!
//! let outcome = registry.execute::<AfterStartup>(correlation_id).await;
//! assert_eq!(outcome.succeeded(), 1);
//! # }
//! ```

use phase::PhaseId;

pub mod context;
pub mod outcome;
pub mod phase;
pub mod registry;
pub mod source;

/// Errors raised by hooks and hook sources.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    /// The hook reported a failure.
    #[error("hook '{hook}' failed: {reason}")]
    Failed {
        /// The hook name.
        hook: String,
        /// Why it failed.
        reason: String,
    },

    /// The hook panicked.
    #[error("hook '{hook}' panicked: {message}")]
    Panicked {
        /// The hook name.
        hook: String,
        /// The panic message.
        message: String,
    },

    /// A hook source could not describe its hooks.
    #[error("hook source '{source_name}' is invalid: {reason}")]
    Source {
        /// The source name.
        source_name: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl HookError {
    /// Creates a [`HookError::Failed`].
    #[must_use]
    pub fn failed(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        HookError::Failed {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            HookError::Failed { .. } => "failed",
            HookError::Panicked { .. } => "panicked",
            HookError::Source { .. } => "source",
        }
    }
}

/// Errors that can occur during hook registration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookRegistrationError {
    /// A hook with this name already exists for the phase.
    #[error("hook '{name}' already registered for phase '{phase}'")]
    DuplicateName {
        /// The phase where the duplicate was found.
        phase: PhaseId,
        /// The duplicate hook name.
        name: String,
    },

    /// The hook source could not enumerate its hooks.
    #[error("could not register hooks of '{source_name}': {reason}")]
    Source {
        /// The source name.
        source_name: String,
        /// Why enumeration failed.
        reason: String,
    },
}

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::context::{CorrelationId, HookContext};
    pub use crate::outcome::{HookOutcome, HookResult};
    pub use crate::phase::{
        AfterStartup, BeforeBootstrap, BeforeShutdown, IntoPhaseIds, OncePerRequest, Phase,
        PhaseId,
    };
    pub use crate::registry::{HookRegistration, HookRegistry};
    pub use crate::source::{HookDefinition, HookHandler, HookSource, StaticHookSource};
    pub use crate::{HookError, HookRegistrationError};
}
