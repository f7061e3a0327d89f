//! Node options.
//!
//! [`Options`] holds everything a node is configured with. Options are built
//! with the `with_*` setters or loaded from a JSON file; missing fields take
//! their defaults.
//!
//! ```
//! use lodestar_core::options::Options;
//! use lodestar_core::profile::Profile;
//!
//! let options: Options = serde_json::from_str(r#"{
//!     "instanceName": "edge-1",
//!     "activeProfiles": ["WEB"],
//!     "serverPort": 0
//! }"#).unwrap();
//!
//! assert_eq!(options.instance_name, "edge-1");
//! assert!(Profile::WEB.is_active(&options.active_profiles));
//! assert_eq!(options.time_zone_id, "UTC");
//! ```

use core::time::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use lodestar_runtime::cluster::ClusterManager;
use lodestar_runtime::runtime::{
    ClusterOptions, DEFAULT_WORKER_POOL_SIZE, RuntimeOptions, default_event_loop_pool_size,
};
use serde::{Deserialize, Serialize};

use crate::profile::{ActiveProfiles, Profile};
use crate::time_zone::{DEFAULT_TIME_ZONE, validate_time_zone};
use crate::tracking::LOGGING_STRATEGY;

/// Default port of the web unit.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default time the watching units wait for file changes to settle.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Errors raised while loading or checking options.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    /// The options file could not be read.
    #[error("failed to read options from {path}: {source}")]
    Io {
        /// The options file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The options file is not valid options JSON.
    #[error("failed to parse options from {path}: {source}")]
    Parse {
        /// The options file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// An option has an unusable value.
    #[error("invalid option '{option}': {reason}")]
    Invalid {
        /// The option name.
        option: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl OptionsError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            OptionsError::Io { .. } => "io",
            OptionsError::Parse { .. } => "parse",
            OptionsError::Invalid { .. } => "invalid",
        }
    }
}

/// Configuration of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Name of the instance, used in logs.
    pub instance_name: String,
    /// Number of event-loop threads.
    pub event_loop_pool_size: usize,
    /// Maximum number of blocking tasks running at once.
    pub worker_pool_size: usize,
    /// Whether the node joins a cluster.
    pub clustered: bool,
    /// Cluster port, `0` lets the provider choose.
    pub cluster_port: u16,
    /// Externally-provided cluster bind address.
    pub cluster_host: Option<String>,
    /// Default time zone of the process.
    pub time_zone_id: String,
    /// Profiles whose units this node runs.
    pub active_profiles: ActiveProfiles,
    /// Root of the log, config, models and verticles directories.
    pub working_directory: PathBuf,
    /// Skips link-time discovery of hooks and units.
    pub ignore_class_path: bool,
    /// Name of the message tracking strategy.
    pub tracking_strategy: String,
    /// Additional codecs as message type name to codec name.
    pub event_bus_codecs: IndexMap<String, String>,
    /// Port of the web unit.
    pub server_port: u16,
    /// Whether the models and verticles directories are watched.
    pub watch_files: bool,
    /// Milliseconds the watching units wait for file changes to settle.
    pub watch_interval_millis: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            instance_name: format!("lodestar-{}", nanoid::nanoid!(10)),
            event_loop_pool_size: default_event_loop_pool_size(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            clustered: false,
            cluster_port: 0,
            cluster_host: None,
            time_zone_id: DEFAULT_TIME_ZONE.to_string(),
            active_profiles: Profile::defaults(),
            working_directory: PathBuf::from("."),
            ignore_class_path: false,
            tracking_strategy: LOGGING_STRATEGY.to_string(),
            event_bus_codecs: IndexMap::new(),
            server_port: DEFAULT_SERVER_PORT,
            watch_files: true,
            watch_interval_millis: millis(DEFAULT_WATCH_INTERVAL),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Options {
    /// Creates options with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads options from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Io`] if the file cannot be read, or
    /// [`OptionsError::Parse`] if it is not valid options JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| OptionsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks the options for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Invalid`] naming the first bad option.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.event_loop_pool_size == 0 {
            return Err(OptionsError::Invalid {
                option: "eventLoopPoolSize",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker_pool_size == 0 {
            return Err(OptionsError::Invalid {
                option: "workerPoolSize",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.watch_interval_millis == 0 {
            return Err(OptionsError::Invalid {
                option: "watchIntervalMillis",
                reason: "must be at least 1".to_string(),
            });
        }
        validate_time_zone(&self.time_zone_id).map_err(|err| OptionsError::Invalid {
            option: "timeZoneId",
            reason: err.to_string(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Derived values
    // ─────────────────────────────────────────────────────────────────────

    /// Returns `<working directory>/logs`, created while bootstrapping.
    #[must_use]
    pub fn log_directory(&self) -> PathBuf {
        self.working_directory.join("logs")
    }

    /// Returns `<working directory>/config`, where a node looks for `logging.json`.
    #[must_use]
    pub fn config_directory(&self) -> PathBuf {
        self.working_directory.join("config")
    }

    /// Returns `<working directory>/models`.
    #[must_use]
    pub fn models_directory(&self) -> PathBuf {
        self.working_directory.join("models")
    }

    /// Returns `<working directory>/verticles`.
    #[must_use]
    pub fn verticles_directory(&self) -> PathBuf {
        self.working_directory.join("verticles")
    }

    /// Returns the time the watching units wait for file changes to settle.
    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_millis)
    }

    /// Returns true if `profile` is active.
    #[must_use]
    pub fn is_profile_active(&self, profile: &Profile) -> bool {
        profile.is_active(&self.active_profiles)
    }

    /// Builds the runtime options. `cluster` is used only if the node is clustered.
    #[must_use]
    pub fn runtime_options(&self, cluster: Option<Arc<dyn ClusterManager>>) -> RuntimeOptions {
        let options = RuntimeOptions::default()
            .with_event_loop_pool_size(self.event_loop_pool_size)
            .with_worker_pool_size(self.worker_pool_size);
        match cluster {
            Some(manager) if self.clustered => {
                let mut cluster = ClusterOptions::new(manager).with_port(self.cluster_port);
                if let Some(host) = &self.cluster_host {
                    cluster = cluster.with_host(host.clone());
                }
                options.with_cluster(cluster)
            }
            _ => options,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Builders
    // ─────────────────────────────────────────────────────────────────────

    /// Sets the instance name.
    #[must_use]
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Sets the number of event-loop threads.
    #[must_use]
    pub fn with_event_loop_pool_size(mut self, size: usize) -> Self {
        self.event_loop_pool_size = size;
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Enables or disables clustering.
    #[must_use]
    pub fn with_clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    /// Sets the cluster port.
    #[must_use]
    pub fn with_cluster_port(mut self, port: u16) -> Self {
        self.cluster_port = port;
        self
    }

    /// Sets the cluster bind address.
    #[must_use]
    pub fn with_cluster_host(mut self, host: impl Into<String>) -> Self {
        self.cluster_host = Some(host.into());
        self
    }

    /// Sets the default time zone.
    #[must_use]
    pub fn with_time_zone_id(mut self, id: impl Into<String>) -> Self {
        self.time_zone_id = id.into();
        self
    }

    /// Replaces the active profiles.
    #[must_use]
    pub fn with_active_profiles(mut self, profiles: impl IntoIterator<Item = Profile>) -> Self {
        self.active_profiles = profiles.into_iter().collect();
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = path.into();
        self
    }

    /// Skips link-time discovery.
    #[must_use]
    pub fn with_ignore_class_path(mut self, ignore: bool) -> Self {
        self.ignore_class_path = ignore;
        self
    }

    /// Sets the tracking strategy name.
    #[must_use]
    pub fn with_tracking_strategy(mut self, name: impl Into<String>) -> Self {
        self.tracking_strategy = name.into();
        self
    }

    /// Adds a message type to codec pair.
    #[must_use]
    pub fn with_event_bus_codec(
        mut self,
        message_type: impl Into<String>,
        codec: impl Into<String>,
    ) -> Self {
        self.event_bus_codecs.insert(message_type.into(), codec.into());
        self
    }

    /// Sets the web unit port.
    #[must_use]
    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Enables or disables the directory watching units.
    #[must_use]
    pub fn with_watch_files(mut self, watch: bool) -> Self {
        self.watch_files = watch;
        self
    }

    /// Sets the time the watching units wait for file changes to settle.
    #[must_use]
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval_millis = millis(interval);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_runtime::cluster::InMemoryCluster;
    use std::io::Write;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(!options.clustered);
        assert_eq!(options.time_zone_id, "UTC");
        assert_eq!(options.tracking_strategy, "logging");
        assert_eq!(options.worker_pool_size, DEFAULT_WORKER_POOL_SIZE);
        assert!(options.instance_name.starts_with("lodestar-"));
        assert_eq!(options.active_profiles, Profile::defaults());
        options.validate().expect("defaults should be valid");
    }

    #[test]
    fn derived_directories_hang_off_working_directory() {
        let options = Options::new().with_working_directory("/srv/node");
        assert_eq!(options.log_directory(), PathBuf::from("/srv/node/logs"));
        assert_eq!(options.config_directory(), PathBuf::from("/srv/node/config"));
        assert_eq!(options.models_directory(), PathBuf::from("/srv/node/models"));
        assert_eq!(options.verticles_directory(), PathBuf::from("/srv/node/verticles"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let options: Options = serde_json::from_str(
            r#"{"clustered": true, "clusterPort": 10000, "eventBusCodecs": {"DataQuery": "lodestar.dataQuery"}}"#,
        )
        .expect("deserialize should succeed");
        assert!(options.clustered);
        assert_eq!(options.cluster_port, 10000);
        assert_eq!(options.event_bus_codecs.get("DataQuery").map(String::as_str), Some("lodestar.dataQuery"));
        assert_eq!(options.server_port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let err = Options::new().with_worker_pool_size(0).validate().unwrap_err();
        assert!(matches!(err, OptionsError::Invalid { option: "workerPoolSize", .. }));

        let err = Options::new().with_time_zone_id("Nowhere").validate().unwrap_err();
        assert!(matches!(err, OptionsError::Invalid { option: "timeZoneId", .. }));
    }

    #[test]
    fn from_json_file_reports_path_on_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"{ not json").expect("write");
        let err = Options::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.as_label(), "parse");

        let err = Options::from_json_file("/definitely/missing/options.json").unwrap_err();
        assert_eq!(err.as_label(), "io");
    }

    #[test]
    fn runtime_options_follow_clustering_flag() {
        let cluster = InMemoryCluster::new();

        let standalone = Options::new().runtime_options(Some(cluster.manager()));
        assert!(standalone.cluster.is_none());

        let clustered = Options::new()
            .with_clustered(true)
            .with_cluster_port(7000)
            .with_cluster_host("10.0.0.5")
            .runtime_options(Some(cluster.manager()));
        let cluster_options = clustered.cluster.expect("cluster options");
        assert_eq!(cluster_options.port, 7000);
        assert_eq!(cluster_options.host.as_deref(), Some("10.0.0.5"));
    }
}
