//! Process-wide default time zone.
//!
//! The default is applied while bootstrapping and read by the log timer, so
//! log timestamps follow the configured zone.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;

/// The time zone used when nothing else is configured.
pub const DEFAULT_TIME_ZONE: &str = "UTC";

static DEFAULT: RwLock<TimeZone> = parking_lot::const_rwlock(TimeZone::Utc);

/// Error returned for an unusable time zone id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time zone id '{0}'")]
pub struct TimeZoneError(pub String);

/// A resolved time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZone {
    /// `UTC`, `GMT` or `Z`.
    Utc,
    /// A fixed `±HH:MM` offset.
    Offset(FixedOffset),
    /// An IANA zone such as `Europe/Berlin`.
    Named(Tz),
}

impl TimeZone {
    /// Parses `UTC`, `GMT`, `Z`, a `±HH:MM` offset or an IANA zone name.
    ///
    /// # Errors
    ///
    /// Returns [`TimeZoneError`] for anything else.
    pub fn parse(id: &str) -> Result<Self, TimeZoneError> {
        match id {
            "UTC" | "GMT" | "Z" => Ok(TimeZone::Utc),
            _ if id.starts_with('+') || id.starts_with('-') => FixedOffset::from_str(id)
                .map(TimeZone::Offset)
                .map_err(|_| TimeZoneError(id.to_string())),
            _ => Tz::from_str(id)
                .map(TimeZone::Named)
                .map_err(|_| TimeZoneError(id.to_string())),
        }
    }

    /// Returns the current time in this zone.
    #[must_use]
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.at(Utc::now())
    }

    /// Converts `instant` into this zone.
    #[must_use]
    pub fn at(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            TimeZone::Utc => instant.fixed_offset(),
            TimeZone::Offset(offset) => instant.with_timezone(offset),
            TimeZone::Named(tz) => instant.with_timezone(tz).fixed_offset(),
        }
    }
}

impl fmt::Display for TimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZone::Utc => f.write_str(DEFAULT_TIME_ZONE),
            TimeZone::Offset(offset) => write!(f, "{offset}"),
            TimeZone::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// Checks that `id` names a time zone [`TimeZone::parse`] accepts.
///
/// # Errors
///
/// Returns [`TimeZoneError`] otherwise.
pub fn validate_time_zone(id: &str) -> Result<(), TimeZoneError> {
    TimeZone::parse(id).map(drop)
}

/// Parses `id` and makes it the process default.
///
/// # Errors
///
/// Returns [`TimeZoneError`] if `id` is invalid; the previous default stays.
pub fn apply_default_time_zone(id: &str) -> Result<TimeZone, TimeZoneError> {
    let zone = TimeZone::parse(id)?;
    *DEFAULT.write() = zone;
    tracing::debug!(time_zone = %zone, "applied default time zone");
    Ok(zone)
}

/// Returns the process default time zone, UTC if none was applied.
#[must_use]
pub fn default_time_zone() -> TimeZone {
    *DEFAULT.read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn accepts_known_forms() {
        for id in ["UTC", "GMT", "Z", "+01:00", "-05:30", "Europe/Berlin", "America/Argentina/Buenos_Aires", "Etc/GMT+2"] {
            assert!(validate_time_zone(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_unknown_zones() {
        for id in ["", "utc", "+1:00", "+25:00", "Europe/", "Europe", "Foo/Bar", "Mars Base/One"] {
            assert!(validate_time_zone(id).is_err(), "{id} should be invalid");
        }
    }

    #[test]
    fn converts_into_the_zone() {
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();

        let berlin = TimeZone::parse("Europe/Berlin").expect("known zone");
        assert_eq!(berlin.at(instant).offset().local_minus_utc(), 2 * 3600);
        assert_eq!(berlin.to_string(), "Europe/Berlin");

        let offset = TimeZone::parse("-05:30").expect("offset");
        assert_eq!(offset.at(instant).offset().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(TimeZone::parse("Z").expect("utc").at(instant), instant.fixed_offset());
    }

    #[test]
    fn applied_zone_becomes_the_default() {
        let applied = apply_default_time_zone("+02:00").expect("offset should apply");
        assert_eq!(default_time_zone(), applied);
        assert_eq!(default_time_zone().now().offset().local_minus_utc(), 2 * 3600);

        assert!(apply_default_time_zone("Foo/Bar").is_err());
        assert_eq!(default_time_zone(), applied);

        apply_default_time_zone(DEFAULT_TIME_ZONE).expect("UTC should apply");
        assert_eq!(default_time_zone(), TimeZone::Utc);
    }
}
