//! Tracing setup for applications embedding the bridge.
//!
//! Events are emitted under the crate's module paths, so the filter can be
//! tuned per part of the bridge:
//!
//! | Target                    | Emits                                     |
//! |---------------------------|-------------------------------------------|
//! | `node_bridge::controller` | health transitions, session epochs        |
//! | `node_bridge::tasks`      | prober, log streamer and backoff decisions |
//! | `node_bridge::rpc`        | gRPC channel, calls and the user stream   |
//! | `node_bridge::rest`       | REST requests and session token handling  |

use std::fs::File;
use std::path::Path;
use tracing::Dispatch;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogLevel, LoggingConfig};
use crate::error::{BridgeError, Result};

/// Background loops run every health interval; keep them quiet unless asked
const LOOP_TARGETS: [&str; 2] = ["node_bridge::tasks", "node_bridge::rpc::users"];

/// Filter directives for `config`: the crate level, the loop targets capped
/// at `info` unless verbose, then any per-target overrides.
pub fn directives(config: &LoggingConfig) -> String {
    let level = if config.verbose {
        LogLevel::Debug
    } else {
        config.log_level
    };

    let mut directives = vec![format!("node_bridge={}", level.to_tracing_level())];
    if !config.verbose && level > LogLevel::Info {
        for target in LOOP_TARGETS {
            directives.push(format!("{}={}", target, LogLevel::Info.to_tracing_level()));
        }
    }
    for (target, level) in &config.targets {
        directives.push(format!("{}={}", target, level.to_tracing_level()));
    }
    directives.join(",")
}

fn env_filter(config: &LoggingConfig, from_env: Option<String>) -> Result<EnvFilter> {
    let directives = from_env.unwrap_or_else(|| directives(config));
    EnvFilter::try_new(&directives).map_err(|e| {
        BridgeError::Configuration(format!("Invalid log filter {:?}: {}", directives, e))
    })
}

/// Build the subscriber described by `config` without installing it.
///
/// `RUST_LOG` replaces the configured directives when it is set. Scope the
/// result with `tracing::dispatcher::with_default`, or install it globally
/// with `init_logging`.
pub fn subscriber(config: &LoggingConfig) -> Result<Dispatch> {
    let filter = env_filter(config, std::env::var(EnvFilter::DEFAULT_ENV).ok())?;
    match config.log_file {
        Some(ref log_path) => file_subscriber(log_path, filter),
        None => Ok(stdout_subscriber(filter)),
    }
}

/// Install the configured subscriber as the process-wide default
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    tracing::dispatcher::set_global_default(subscriber(config)?)
        .map_err(|e| BridgeError::Configuration(format!("Logger already installed: {}", e)))
}

fn stdout_subscriber(filter: EnvFilter) -> Dispatch {
    let layer = fmt::layer().with_target(true).compact();
    Dispatch::new(tracing_subscriber::registry().with(filter).with(layer))
}

/// JSON lines, one event per line, for log shippers
fn file_subscriber(log_path: &Path, filter: EnvFilter) -> Result<Dispatch> {
    let file = File::create(log_path)
        .map_err(|e| BridgeError::Configuration(format!("Failed to create log file: {}", e)))?;

    let layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_ansi(false)
        .json();
    Ok(Dispatch::new(tracing_subscriber::registry().with(filter).with(layer)))
}

/// Route events to the test harness output, once per process
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("node_bridge=debug"));
        let layer = fmt::layer().with_test_writer().with_target(false).compact();
        let _ = tracing::dispatcher::set_global_default(Dispatch::new(
            tracing_subscriber::registry().with(filter).with(layer),
        ));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tracing::{debug, info};

    #[test]
    fn test_default_directives() {
        let config = LoggingConfig::default();
        assert_eq!(directives(&config), "node_bridge=INFO");
    }

    #[test]
    fn test_debug_level_keeps_loops_at_info() {
        let config = LoggingConfig {
            log_level: LogLevel::Debug,
            ..LoggingConfig::default()
        };
        assert_eq!(
            directives(&config),
            "node_bridge=DEBUG,node_bridge::tasks=INFO,node_bridge::rpc::users=INFO"
        );

        let verbose = LoggingConfig {
            verbose: true,
            ..LoggingConfig::default()
        };
        assert_eq!(directives(&verbose), "node_bridge=DEBUG");
    }

    #[test]
    fn test_target_overrides_come_last() {
        let mut config = LoggingConfig::default();
        config
            .targets
            .insert("node_bridge::rest".to_string(), LogLevel::Trace);
        assert_eq!(directives(&config), "node_bridge=INFO,node_bridge::rest=TRACE");
    }

    #[test]
    fn test_env_directives_replace_config() {
        let config = LoggingConfig::default();
        assert!(env_filter(&config, Some("node_bridge::rpc=trace".to_string())).is_ok());
        assert!(env_filter(&config, Some("node_bridge=loud".to_string())).is_err());
    }

    #[test]
    fn test_file_subscriber_writes_filtered_json() {
        let log_file = NamedTempFile::new().unwrap();
        let mut config = LoggingConfig {
            log_level: LogLevel::Debug,
            log_file: Some(log_file.path().to_path_buf()),
            ..LoggingConfig::default()
        };
        config
            .targets
            .insert("node_bridge::rest".to_string(), LogLevel::Warn);

        let filter = env_filter(&config, None).unwrap();
        let dispatch = file_subscriber(log_file.path(), filter).unwrap();
        tracing::dispatcher::with_default(&dispatch, || {
            info!(target: "node_bridge::rpc", epoch = 3, "gRPC session started");
            debug!(target: "node_bridge::tasks", "Health prober started");
            info!(target: "node_bridge::rest", "REST session started");
        });

        let written = std::fs::read_to_string(log_file.path()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 1, "{}", written);

        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["target"], "node_bridge::rpc");
        assert_eq!(event["fields"]["message"], "gRPC session started");
        assert_eq!(event["fields"]["epoch"], 3);
    }

    #[test]
    fn test_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
