//! Deployment profiles.
//!
//! A [`Profile`] tags a unit with the kind of node it belongs on. A node runs a
//! unit only if the unit's profile is one of the node's active profiles.

use core::fmt;
use std::borrow::Cow;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Ordered set of active profiles.
pub type ActiveProfiles = IndexSet<Profile>;

/// A case-sensitive deployment profile name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(Cow<'static, str>);

impl Profile {
    /// Units serving web traffic.
    pub const WEB: Profile = Profile(Cow::Borrowed("WEB"));
    /// Units every node needs.
    pub const CORE: Profile = Profile(Cow::Borrowed("CORE"));
    /// Units considered production ready.
    pub const STABLE: Profile = Profile(Cow::Borrowed("STABLE"));
    /// Experimental units.
    pub const INCUBATOR: Profile = Profile(Cow::Borrowed("INCUBATOR"));

    /// Creates a profile from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Returns the profile name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this profile is one of `active`.
    #[must_use]
    pub fn is_active(&self, active: &ActiveProfiles) -> bool {
        active.contains(self)
    }

    /// Returns the profiles active when nothing is configured.
    #[must_use]
    pub fn defaults() -> ActiveProfiles {
        [Profile::CORE, Profile::STABLE, Profile::WEB]
            .into_iter()
            .collect()
    }

    /// Parses a comma-separated profile list, skipping blank entries.
    ///
    /// ```
    /// use lodestar_core::profile::Profile;
    ///
    /// let active = Profile::parse_list("WEB, CORE,,");
    /// assert_eq!(active.len(), 2);
    /// assert!(Profile::WEB.is_active(&active));
    /// ```
    #[must_use]
    pub fn parse_list(list: &str) -> ActiveProfiles {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Profile::new)
            .collect()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Profile {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Profile {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn constants_equal_owned_names() {
        assert_eq!(Profile::WEB, Profile::new("WEB"));
        assert_eq!(Profile::CORE, Profile::from("CORE"));
    }

    #[test]
    fn membership_is_case_sensitive() {
        let active: ActiveProfiles = [Profile::WEB].into_iter().collect();
        assert!(Profile::WEB.is_active(&active));
        assert!(!Profile::new("web").is_active(&active));
    }

    #[test]
    fn defaults_keep_their_order() {
        let names: Vec<_> = Profile::defaults().iter().map(Profile::as_str).map(str::to_string).collect();
        assert_eq!(names, ["CORE", "STABLE", "WEB"]);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Profile::INCUBATOR).expect("serialize should succeed");
        assert_eq!(json, "\"INCUBATOR\"");
        let back: Profile = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, Profile::INCUBATOR);
    }

    proptest! {
        #[test]
        fn is_active_matches_set_membership(
            names in proptest::collection::vec("[A-Za-z]{1,6}", 0..8),
            candidate in "[A-Za-z]{1,6}",
        ) {
            let active: ActiveProfiles = names.iter().map(|n| Profile::new(n.clone())).collect();
            let expected = names.iter().any(|n| *n == candidate);
            prop_assert_eq!(Profile::new(candidate).is_active(&active), expected);
        }
    }
}
