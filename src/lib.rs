/*!
 * Node Bridge - client-side control of a remote proxy node
 *
 * Manages one node over either of two wire protocols:
 * - gRPC: a persistent mutual-TLS channel with streaming logs and user updates
 * - REST: stateless HTTPS requests with protobuf bodies
 *
 * A session runs three background tasks (health prober, log streamer and
 * user synchroniser) that recover on their own; callers only see the
 * resulting health state.
 */

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod node;
pub mod rest;
pub mod rpc;
pub mod tls;

mod tasks;

// Re-export commonly used types
pub use config::{LoggingConfig, NodeConfig, NodeProtocol, QueueConfig, Timings};
pub use controller::{Controller, Health, LogReceiver, NodeIdentity};
pub use error::{BridgeError, ErrorCategory, Result};
pub use node::{Node, NodeTransport};
pub use rest::RestNode;
pub use rpc::RpcNode;

pub use node_bridge_proto as proto;
pub use node_bridge_proto::profile;
pub use node_bridge_proto::{BackendType, StatType, User};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
