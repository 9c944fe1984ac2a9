//! Wire definitions for talking to a proxy node.
//!
//! Holds the protobuf messages shared by both transports and the client stub
//! for the `service.NodeService` gRPC service. The bridge treats everything in
//! here as opaque payloads.

pub mod client;
pub mod messages;
pub mod profile;

// Re-export commonly used types for convenience
pub use client::NodeServiceClient;
pub use messages::*;
