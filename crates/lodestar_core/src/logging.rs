//! Logging setup.
//!
//! [`init`] installs a `tracing` subscriber whose filter can be replaced at
//! runtime through the returned [`LogControl`]. The logger manager unit uses
//! that control to serve filter changes over the event bus.
//!
//! Timestamps are written in the process default time zone. With a log
//! directory configured, events are also appended to a daily rolling
//! `lodestar.*.log` file in it. A node reads its logging settings from
//! `logging.json` in its config directory (see [`LoggingOptions::from_config_directory`]).
//!
//! # Example
//!
//! ```
//! use lodestar_core::logging::{LogFormat, LoggingOptions};
//! use tracing::Level;
//!
//! let control = lodestar_core::logging::init(
//!     &LoggingOptions::default()
//!         .with_level(Level::DEBUG)
//!         .with_format(LogFormat::Compact)
//!         .with_env_filter("lodestar_core=debug,lodestar_runtime=info"),
//! );
//! control.set_filter("warn").unwrap();
//! assert_eq!(control.current_filter(), "warn");
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{FmtSpan, Writer};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::time_zone::{TimeZone, default_time_zone};

/// Name of the logging settings file in the config directory.
pub const LOGGING_CONFIG_FILE: &str = "logging.json";

const LOG_FILE_PREFIX: &str = "lodestar";

// ─────────────────────────────────────────────────────────────────────────────
// LogFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output (default).
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

impl LogFormat {
    /// Parses a format name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoggingOptions
// ─────────────────────────────────────────────────────────────────────────────

/// How the subscriber is set up.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    level: Level,
    format: LogFormat,
    env_filter: Option<String>,
    span_events: bool,
    log_directory: Option<PathBuf>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            env_filter: None,
            span_events: false,
            log_directory: None,
        }
    }
}

/// Content of `logging.json`, every field optional.
///
/// ```json
/// { "format": "json", "filter": "info,lodestar_core=debug", "spanEvents": false }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct LoggingFile {
    format: Option<LogFormat>,
    filter: Option<String>,
    span_events: Option<bool>,
}

impl LoggingOptions {
    /// Reads [`LOGGING_CONFIG_FILE`] from `dir` on top of the defaults.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError::Config`] if the file cannot be read or parsed.
    pub fn from_config_directory(dir: &Path) -> Result<Option<Self>, LoggingError> {
        let path = dir.join(LOGGING_CONFIG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(LoggingError::Config {
                    path,
                    reason: err.to_string(),
                });
            }
        };
        let file: LoggingFile = serde_json::from_str(&raw).map_err(|err| LoggingError::Config {
            path: path.clone(),
            reason: err.to_string(),
        })?;

        let mut options = LoggingOptions::default();
        if let Some(format) = file.format {
            options.format = format;
        }
        options.env_filter = file.filter;
        options.span_events = file.span_events.unwrap_or_default();
        Ok(Some(options))
    }

    /// Sets the maximum log level used when no filter is given.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets filter directives, `target=level,target=level,...`.
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Enables span enter/exit events in output.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Also appends events to a daily rolling file in `dir`.
    #[must_use]
    pub fn with_log_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_directory = Some(dir.into());
        self
    }

    /// Returns the directory log files are written to.
    #[must_use]
    pub fn log_directory(&self) -> Option<&Path> {
        self.log_directory.as_deref()
    }

    /// Returns the configured level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    /// Returns the configured format.
    #[must_use]
    pub fn format(&self) -> LogFormat {
        self.format
    }

    fn directives(&self) -> String {
        self.env_filter
            .clone()
            .unwrap_or_else(|| self.level.as_str().to_ascii_lowercase())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LogControl
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised when changing the log filter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoggingError {
    /// The directives do not parse.
    #[error("invalid log filter '{directives}': {reason}")]
    InvalidFilter {
        /// The rejected directives.
        directives: String,
        /// The parser message.
        reason: String,
    },

    /// The installed subscriber refused the new filter.
    #[error("failed to reload log filter: {0}")]
    Reload(String),

    /// The logging settings file is unusable.
    #[error("invalid logging settings in {path}: {reason}")]
    Config {
        /// The settings file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

impl LoggingError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            LoggingError::InvalidFilter { .. } => "invalid_filter",
            LoggingError::Reload(_) => "reload",
            LoggingError::Config { .. } => "config",
        }
    }
}

/// Handle to the active log filter.
///
/// A detached control (see [`LogControl::detached`]) validates and records
/// filters without a subscriber behind it.
#[derive(Clone)]
pub struct LogControl {
    reload: Option<reload::Handle<EnvFilter, Registry>>,
    current: Arc<RwLock<String>>,
}

impl core::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogControl")
            .field("current", &*self.current.read())
            .field("attached", &self.reload.is_some())
            .finish()
    }
}

impl LogControl {
    /// Creates a control that is not attached to any subscriber.
    #[must_use]
    pub fn detached(initial: impl Into<String>) -> Self {
        Self {
            reload: None,
            current: Arc::new(RwLock::new(initial.into())),
        }
    }

    /// Returns true if filter changes reach an installed subscriber.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.reload.is_some()
    }

    /// Returns the active filter directives.
    #[must_use]
    pub fn current_filter(&self) -> String {
        self.current.read().clone()
    }

    /// Replaces the active filter.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError::InvalidFilter`] if `directives` do not parse,
    /// or [`LoggingError::Reload`] if the subscriber is gone.
    pub fn set_filter(&self, directives: &str) -> Result<(), LoggingError> {
        let filter = EnvFilter::try_new(directives).map_err(|err| LoggingError::InvalidFilter {
            directives: directives.to_string(),
            reason: err.to_string(),
        })?;
        if let Some(handle) = &self.reload {
            handle
                .reload(filter)
                .map_err(|err| LoggingError::Reload(err.to_string()))?;
        }
        *self.current.write() = directives.to_string();
        tracing::info!(filter = directives, "log filter changed");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ZonedTimer
// ─────────────────────────────────────────────────────────────────────────────

/// Writes event timestamps as RFC 3339 in the process default time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZonedTimer;

impl ZonedTimer {
    fn write(zone: TimeZone, w: &mut Writer<'_>) -> core::fmt::Result {
        w.write_str(&zone.now().to_rfc3339_opts(SecondsFormat::Micros, false))
    }
}

impl FormatTime for ZonedTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> core::fmt::Result {
        Self::write(default_time_zone(), w)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init
// ─────────────────────────────────────────────────────────────────────────────

fn file_appender(dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(dir).map_err(|err| err.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .map_err(|err| err.to_string())
}

/// Installs the global subscriber.
///
/// If a subscriber is already installed, it is left in place and the returned
/// control is detached. A log directory that cannot be used is reported and
/// skipped.
pub fn init(options: &LoggingOptions) -> LogControl {
    let directives = options.directives();
    let (directives, filter) = match EnvFilter::try_new(&directives) {
        Ok(filter) => (directives, filter),
        Err(_) => {
            let fallback = options.level.as_str().to_ascii_lowercase();
            let filter = EnvFilter::new(&fallback);
            (fallback, filter)
        }
    };
    let (filter_layer, handle) = reload::Layer::new(filter);

    let span_events = if options.span_events {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let (file_layer, file_error) = match options.log_directory.as_deref().map(file_appender) {
        Some(Ok(appender)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_timer(ZonedTimer)
                    .with_writer(appender),
            ),
            None,
        ),
        Some(Err(reason)) => (None, Some(reason)),
        None => (None, None),
    };

    let installed = match options.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter_layer)
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_timer(ZonedTimer)
                    .with_span_events(span_events),
            )
            .try_init()
            .is_ok(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter_layer)
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_timer(ZonedTimer)
                    .with_span_events(span_events),
            )
            .try_init()
            .is_ok(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter_layer)
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_timer(ZonedTimer)
                    .with_span_events(span_events),
            )
            .try_init()
            .is_ok(),
    };

    if !installed {
        return LogControl::detached(directives);
    }
    tracing::info!(
        filter = %directives,
        format = ?options.format,
        log_directory = ?options.log_directory,
        "logging initialized"
    );
    if let Some(reason) = file_error {
        tracing::warn!(log_directory = ?options.log_directory, reason = %reason, "cannot write log files");
    }
    LogControl {
        reload: Some(handle),
        current: Arc::new(RwLock::new(directives)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = LoggingOptions::default();
        assert_eq!(options.level(), Level::INFO);
        assert_eq!(options.format(), LogFormat::Pretty);
        assert_eq!(options.directives(), "info");
    }

    #[test]
    fn env_filter_wins_over_level() {
        let options = LoggingOptions::default()
            .with_level(Level::DEBUG)
            .with_env_filter("lodestar_core=trace");
        assert_eq!(options.directives(), "lodestar_core=trace");
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn timer_writes_the_zone_offset() {
        let zone = TimeZone::parse("+05:30").expect("offset");
        let mut out = String::new();
        ZonedTimer::write(zone, &mut Writer::new(&mut out)).expect("format");
        assert!(out.ends_with("+05:30"), "unexpected timestamp {out}");
    }

    #[test]
    fn file_appender_creates_the_directory() {
        use std::io::Write;

        let dir = tempfile::tempdir().expect("temp dir");
        let logs = dir.path().join("logs");
        let mut appender = file_appender(&logs).expect("appender");
        appender.write_all(b"hello\n").expect("write");
        appender.flush().expect("flush");

        let files: Vec<String> = std::fs::read_dir(&logs)
            .expect("log directory")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with(LOG_FILE_PREFIX) && files[0].ends_with(".log"));
    }

    #[test]
    fn settings_come_from_the_config_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(LoggingOptions::from_config_directory(dir.path()).expect("read").is_none());

        std::fs::write(
            dir.path().join(LOGGING_CONFIG_FILE),
            r#"{"format": "json", "filter": "warn,lodestar_core=debug"}"#,
        )
        .expect("write");
        let options = LoggingOptions::from_config_directory(dir.path())
            .expect("read")
            .expect("settings present");
        assert_eq!(options.format(), LogFormat::Json);
        assert_eq!(options.directives(), "warn,lodestar_core=debug");

        std::fs::write(dir.path().join(LOGGING_CONFIG_FILE), r#"{"colour": true}"#).expect("write");
        let err = LoggingOptions::from_config_directory(dir.path()).unwrap_err();
        assert_eq!(err.as_label(), "config");
    }

    #[test]
    fn detached_control_records_valid_filters_only() {
        let control = LogControl::detached("info");
        assert!(!control.is_attached());

        control.set_filter("lodestar_runtime=debug").expect("valid filter");
        assert_eq!(control.current_filter(), "lodestar_runtime=debug");

        let err = control.set_filter("lodestar_runtime=loud").unwrap_err();
        assert_eq!(err.as_label(), "invalid_filter");
        assert_eq!(control.current_filter(), "lodestar_runtime=debug");
    }
}
