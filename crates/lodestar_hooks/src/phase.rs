//! Lifecycle phase markers.
//!
//! Phases are pure marker types implementing [`Phase`]. A hook names the
//! phases it runs in through [`IntoPhaseIds`], which accepts a single phase or
//! a tuple of phases:
//!
//! ```
//! use lodestar_hooks::phase::{AfterStartup, BeforeShutdown, IntoPhaseIds, PhaseId};
//!
//! let ids = <(AfterStartup, BeforeShutdown)>::phase_ids();
//! assert_eq!(ids, vec![PhaseId::of::<AfterStartup>(), PhaseId::of::<BeforeShutdown>()]);
//! ```

use core::any::TypeId;
use core::fmt;

use variadics_please::all_tuples;

/// Identifies a lifecycle phase at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseId {
    type_id: TypeId,
    type_name: &'static str,
    name: &'static str,
}

impl PhaseId {
    /// Creates a `PhaseId` for the given phase marker type.
    #[must_use]
    pub fn of<P: Phase>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            type_name: core::any::type_name::<P>(),
            name: P::NAME,
        }
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the marker type name for debugging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the phase name, e.g. `BEFORE_BOOTSTRAP`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Marker trait for lifecycle phases.
pub trait Phase: 'static {
    /// Upper-case phase name used in logs.
    const NAME: &'static str;
}

/// Types that name one or more phases.
pub trait IntoPhaseIds {
    /// Returns the phase IDs for this type.
    fn phase_ids() -> Vec<PhaseId>;
}

impl<P: Phase> IntoPhaseIds for P {
    fn phase_ids() -> Vec<PhaseId> {
        vec![PhaseId::of::<P>()]
    }
}

macro_rules! impl_into_phase_ids_for_tuple {
    ($($P:ident),*) => {
        impl<$($P: Phase),*> IntoPhaseIds for ($($P,)*) {
            fn phase_ids() -> Vec<PhaseId> {
                vec![$(PhaseId::of::<$P>()),*]
            }
        }
    };
}

all_tuples!(impl_into_phase_ids_for_tuple, 2, 4, P);

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle Phases
// ─────────────────────────────────────────────────────────────────────────────

/// Runs before the bootstrap sequence touches shared state, codecs or deployments.
pub struct BeforeBootstrap;
impl Phase for BeforeBootstrap {
    const NAME: &'static str = "BEFORE_BOOTSTRAP";
}

/// Runs once every unit is deployed.
///
/// Failures are reported to the caller and never roll back deployments.
pub struct AfterStartup;
impl Phase for AfterStartup {
    const NAME: &'static str = "AFTER_STARTUP";
}

/// Runs when the runtime handle closes, before the instance is deregistered.
pub struct BeforeShutdown;
impl Phase for BeforeShutdown {
    const NAME: &'static str = "BEFORE_SHUTDOWN";
}

/// Runs for every connection accepted by the web unit.
pub struct OncePerRequest;
impl Phase for OncePerRequest {
    const NAME: &'static str = "ONCE_PER_REQUEST";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_id_equality() {
        assert_eq!(PhaseId::of::<BeforeBootstrap>(), PhaseId::of::<BeforeBootstrap>());
        assert_ne!(PhaseId::of::<BeforeBootstrap>(), PhaseId::of::<AfterStartup>());
    }

    #[test]
    fn phase_id_names() {
        let id = PhaseId::of::<BeforeShutdown>();
        assert_eq!(id.name(), "BEFORE_SHUTDOWN");
        assert_eq!(id.to_string(), "BEFORE_SHUTDOWN");
        assert!(id.type_name().ends_with("BeforeShutdown"));
        assert_eq!(id.type_id(), TypeId::of::<BeforeShutdown>());
    }

    #[test]
    fn into_phase_ids_single_and_tuple() {
        assert_eq!(OncePerRequest::phase_ids(), vec![PhaseId::of::<OncePerRequest>()]);

        let ids = <(BeforeBootstrap, AfterStartup, BeforeShutdown)>::phase_ids();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], PhaseId::of::<BeforeShutdown>());
    }
}
