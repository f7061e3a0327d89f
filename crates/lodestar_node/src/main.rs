//! Lodestar node.
//!
//! Bootstraps one instance, runs it until interrupted and closes it.
//!
//! # Usage
//!
//! ```bash
//! lodestar [options.json]
//! ```
//!
//! # Environment
//!
//! - `LODESTAR_OPTIONS` - Options file used when no argument is given
//! - `LODESTAR_INSTANCE_INTERNAL_IP` - Cluster bind address
//! - `LODESTAR_LOG_FORMAT` - `pretty`, `compact` or `json`
//! - `RUST_LOG` - Initial log filter
//!
//! A `.env` file in the working directory is loaded first. Logging settings
//! are read from `logging.json` in the config directory and log files are
//! written to the log directory.

use std::process::ExitCode;

use lodestar_core::bootstrap::Bootstrap;
use lodestar_core::logging::{self, LogFormat, LoggingOptions};
use lodestar_core::options::Options;

const OPTIONS_VAR: &str = "LODESTAR_OPTIONS";
const INTERNAL_IP_VAR: &str = "LODESTAR_INSTANCE_INTERNAL_IP";
const LOG_FORMAT_VAR: &str = "LODESTAR_LOG_FORMAT";

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let path = std::env::args().nth(1).or_else(|| std::env::var(OPTIONS_VAR).ok());
    let loaded = match &path {
        Some(path) => Options::from_json_file(path),
        None => Ok(Options::default()),
    };

    let (mut logging_options, logging_error) = match &loaded {
        Ok(options) => match LoggingOptions::from_config_directory(&options.config_directory()) {
            Ok(settings) => (settings.unwrap_or_default(), None),
            Err(err) => (LoggingOptions::default(), Some(err)),
        },
        Err(_) => (LoggingOptions::default(), None),
    };
    if let Some(format) = std::env::var(LOG_FORMAT_VAR).ok().and_then(|f| LogFormat::parse(&f)) {
        logging_options = logging_options.with_format(format);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        logging_options = logging_options.with_env_filter(filter);
    }
    if let Ok(options) = &loaded {
        logging_options = logging_options.with_log_directory(options.log_directory());
    }
    let log_control = logging::init(&logging_options);
    if let Some(err) = logging_error {
        tracing::warn!(error = %err, label = err.as_label(), "ignoring logging settings");
    }

    let mut options = match loaded {
        Ok(options) => options,
        Err(err) => {
            tracing::error!(path = ?path, error = %err, label = err.as_label(), "cannot load options");
            return ExitCode::FAILURE;
        }
    };
    if let Ok(host) = std::env::var(INTERNAL_IP_VAR) {
        options = options.with_cluster_host(host);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(options.event_loop_pool_size.max(1))
        .max_blocking_threads(options.worker_pool_size.max(1))
        .thread_name("lodestar")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "cannot start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let bootstrapped = match Bootstrap::new(options)
            .with_log_control(log_control)
            .run()
            .await
        {
            Ok(bootstrapped) => bootstrapped,
            Err(err) => {
                tracing::error!(error = %err, label = err.as_label(), "bootstrap failed");
                return ExitCode::FAILURE;
            }
        };

        let handle = bootstrapped.instance.handle().clone();
        let shutdown = handle.shutdown_token();
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    tracing::warn!(error = %err, "cannot listen for interrupts");
                }
            }
            () = shutdown.cancelled() => {}
        }
        handle.close().await;
        ExitCode::SUCCESS
    })
}
