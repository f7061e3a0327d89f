//! Correlation ids and the context handed to hooks.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use crate::phase::{Phase, PhaseId};

/// Identifier threaded through an operation for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Creates a correlation id from a specific value.
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Creates a random correlation id.
    #[must_use]
    pub fn random() -> Self {
        Self(nanoid::nanoid!().into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What a hook receives when its phase executes.
///
/// The payload is an arbitrary shared value chosen by whoever executes the
/// phase, typically the live instance.
#[derive(Clone)]
pub struct HookContext {
    phase: PhaseId,
    correlation_id: CorrelationId,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("phase", &self.phase)
            .field("correlation_id", &self.correlation_id)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

impl HookContext {
    /// Creates a context for `phase` without payload.
    #[must_use]
    pub fn new(phase: PhaseId, correlation_id: CorrelationId) -> Self {
        Self {
            phase,
            correlation_id,
            payload: None,
        }
    }

    /// Creates a context for the phase marker `P`.
    #[must_use]
    pub fn of<P: Phase>(correlation_id: CorrelationId) -> Self {
        Self::new(PhaseId::of::<P>(), correlation_id)
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: Arc<T>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns the executing phase.
    #[must_use]
    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Returns the payload if it is a `T`.
    #[must_use]
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.clone()?.downcast::<T>().ok()
    }
}
