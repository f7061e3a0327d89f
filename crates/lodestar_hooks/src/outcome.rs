//! Composite result of executing a phase.

use crate::HookError;
use crate::context::CorrelationId;
use crate::phase::PhaseId;

/// Result of one hook invocation.
#[derive(Debug)]
pub struct HookResult {
    /// The hook name.
    pub name: String,
    /// Correlation id the hook was registered with.
    pub correlation_id: CorrelationId,
    /// What the hook returned.
    pub result: Result<(), HookError>,
}

/// Per-hook results of one phase execution.
///
/// Executing a phase never short-circuits: every hook runs and reports here.
/// Callers decide whether a failure is fatal to them.
#[derive(Debug)]
pub struct HookOutcome {
    phase: PhaseId,
    results: Vec<HookResult>,
}

impl HookOutcome {
    pub(crate) fn new(phase: PhaseId, results: Vec<HookResult>) -> Self {
        Self { phase, results }
    }

    /// Returns the executed phase.
    #[must_use]
    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    /// Returns every result in registration order.
    #[must_use]
    pub fn results(&self) -> &[HookResult] {
        &self.results
    }

    /// Returns the number of hooks that ran.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no hook is registered for the phase.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the number of hooks that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.result.is_ok()).count()
    }

    /// Returns the number of hooks that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Returns true if every hook succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Iterates over failed hooks and their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &HookError)> {
        self.results.iter().filter_map(|r| match &r.result {
            Ok(()) => None,
            Err(err) => Some((r.name.as_str(), err)),
        })
    }
}
