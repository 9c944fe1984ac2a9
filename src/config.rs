/*!
 * Configuration types for the node bridge
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Wire protocol used to reach the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeProtocol {
    /// Persistent gRPC connection with streaming calls
    #[default]
    Grpc,

    /// Stateless HTTPS with protobuf bodies
    Rest,
}

impl NodeProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeProtocol::Grpc => "grpc",
            NodeProtocol::Rest => "rest",
        }
    }
}

impl fmt::Display for NodeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeProtocol {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grpc" => Ok(NodeProtocol::Grpc),
            "rest" => Ok(NodeProtocol::Rest),
            other => Err(BridgeError::Configuration(format!(
                "unknown node protocol: {}",
                other
            ))),
        }
    }
}

/// Capacities of the per-session work queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending user updates before `update_user` blocks
    #[serde(default = "default_user_capacity")]
    pub user_capacity: usize,

    /// Buffered log lines before the log streamer blocks
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Slack for health-change notifications
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            user_capacity: default_user_capacity(),
            log_capacity: default_log_capacity(),
            notify_capacity: default_notify_capacity(),
        }
    }
}

/// Intervals and timeouts, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Pause between two health probes
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,

    /// Pause before re-checking a broken node in the log/user loops
    #[serde(default = "default_broken_backoff")]
    pub broken_backoff_ms: u64,

    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,

    /// Ordinary gRPC requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Ordinary REST requests
    #[serde(default = "default_rest_request_timeout")]
    pub rest_request_timeout_ms: u64,

    /// Bulk user synchronisation
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_ms: u64,

    /// Best-effort remote stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    /// HTTP/2 keep-alive ping interval on the gRPC channel
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_ms: u64,
}

impl Timings {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn broken_backoff(&self) -> Duration {
        Duration::from_millis(self.broken_backoff_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rest_request_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_request_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Every interval and timeout must be non-zero
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("health_interval_ms", self.health_interval_ms),
            ("broken_backoff_ms", self.broken_backoff_ms),
            ("start_timeout_ms", self.start_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("rest_request_timeout_ms", self.rest_request_timeout_ms),
            ("sync_timeout_ms", self.sync_timeout_ms),
            ("stop_timeout_ms", self.stop_timeout_ms),
            ("keep_alive_interval_ms", self.keep_alive_interval_ms),
        ];
        match named.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(BridgeError::Configuration(format!(
                "{} must be positive",
                name
            ))),
            None => Ok(()),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            health_interval_ms: default_health_interval(),
            broken_backoff_ms: default_broken_backoff(),
            start_timeout_ms: default_start_timeout(),
            request_timeout_ms: default_request_timeout(),
            rest_request_timeout_ms: default_rest_request_timeout(),
            sync_timeout_ms: default_sync_timeout(),
            stop_timeout_ms: default_stop_timeout(),
            keep_alive_interval_ms: default_keep_alive_interval(),
        }
    }
}

/// Everything needed to reach and authenticate against one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Host name or IP address of the node
    pub address: String,

    pub port: u16,

    #[serde(default)]
    pub protocol: NodeProtocol,

    /// PEM trust root for the node's certificate
    pub server_ca: String,

    /// API key presented as a bearer credential
    pub api_key: Uuid,

    /// Optional PEM client certificate for mutual TLS (gRPC only)
    #[serde(default)]
    pub client_cert: Option<String>,

    /// PEM private key matching `client_cert`
    #[serde(default)]
    pub client_key: Option<String>,

    /// Opaque settings passed through untouched
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub queues: QueueConfig,

    #[serde(default)]
    pub timings: Timings,
}

impl NodeConfig {
    /// Create a configuration with default queues and timings
    pub fn new(
        address: impl Into<String>,
        port: u16,
        protocol: NodeProtocol,
        server_ca: impl Into<String>,
        api_key: Uuid,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            protocol,
            server_ca: server_ca.into(),
            api_key,
            client_cert: None,
            client_key: None,
            extra: serde_json::Map::new(),
            queues: QueueConfig::default(),
            timings: Timings::default(),
        }
    }

    pub fn with_client_identity(
        mut self,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Self {
        self.client_cert = Some(cert_pem.into());
        self.client_key = Some(key_pem.into());
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Map<String, serde_json::Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.queues.log_capacity = capacity;
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| BridgeError::Configuration(format!("TOML parse error: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Configuration(format!("TOML encode error: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject parameters no transport can work with
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(BridgeError::Configuration("address is empty".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::Configuration("port is empty".to_string()));
        }
        if self.server_ca.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "server CA certificate is empty".to_string(),
            ));
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(BridgeError::Configuration(
                "client certificate and key must be given together".to_string(),
            ));
        }
        if self.queues.user_capacity == 0
            || self.queues.log_capacity == 0
            || self.queues.notify_capacity == 0
        {
            return Err(BridgeError::Configuration(
                "queue capacities must be positive".to_string(),
            ));
        }
        self.timings.validate()
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn authority(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Log level for diagnostic output, ordered from least to most verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging setup for embedding applications
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON lines to this file instead of stdout
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shortcut for `debug` everywhere, background loops included
    #[serde(default)]
    pub verbose: bool,

    /// Per-target levels, e.g. `"node_bridge::rest" = "trace"`
    #[serde(default)]
    pub targets: BTreeMap<String, LogLevel>,
}

// Default value functions for serde
fn default_user_capacity() -> usize {
    1024
}

fn default_log_capacity() -> usize {
    256
}

fn default_notify_capacity() -> usize {
    4
}

fn default_health_interval() -> u64 {
    2_000
}

fn default_broken_backoff() -> u64 {
    5_000
}

fn default_start_timeout() -> u64 {
    15_000
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_rest_request_timeout() -> u64 {
    10_000
}

fn default_sync_timeout() -> u64 {
    10_000
}

fn default_stop_timeout() -> u64 {
    5_000
}

fn default_keep_alive_interval() -> u64 {
    30_000
}
