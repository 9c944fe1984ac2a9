//! The transport contract and the `Node` facade over it

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use node_bridge_proto::{
    BackendStatsResponse, BackendType, BaseInfoResponse, OnlineStatResponse, StatResponse,
    StatType, StatsOnlineIpListResponse, SystemStatsResponse, User,
};

use crate::config::{NodeConfig, NodeProtocol};
use crate::controller::{Controller, Health, LogReceiver};
use crate::error::Result;
use crate::rest::RestNode;
use crate::rpc::RpcNode;

/// Operations every wire protocol provides.
///
/// Synchronous calls fail with `NotConnected` before touching the network
/// when no session is active.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Connection state shared with the background tasks
    fn controller(&self) -> &Arc<Controller>;

    /// Open a session and launch the background tasks.
    ///
    /// An active session is stopped first. `keep_alive` is in seconds.
    async fn start(
        &self,
        config: String,
        backend_type: BackendType,
        users: Vec<User>,
        keep_alive: u64,
    ) -> Result<()>;

    /// End the session. Does nothing when not connected; never fails.
    async fn stop(&self);

    async fn info(&self) -> Result<BaseInfoResponse>;

    async fn system_stats(&self) -> Result<SystemStatsResponse>;

    async fn backend_stats(&self) -> Result<BackendStatsResponse>;

    async fn stats(&self, reset: bool, name: &str, stat_type: StatType) -> Result<StatResponse>;

    async fn user_online_stat(&self, email: &str) -> Result<OnlineStatResponse>;

    async fn user_online_ip_list(&self, email: &str) -> Result<StatsOnlineIpListResponse>;

    /// Replace the node's whole user set
    async fn sync_users(&self, users: Vec<User>) -> Result<()>;
}

/// A managed node, reached over the protocol chosen at construction
pub struct Node {
    protocol: NodeProtocol,
    transport: Box<dyn NodeTransport>,
}

impl Node {
    /// Validate `config` and build the matching transport.
    ///
    /// No network traffic happens until `start`. Must be called from within a
    /// Tokio runtime.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let transport: Box<dyn NodeTransport> = match config.protocol {
            NodeProtocol::Grpc => Box::new(RpcNode::new(&config)?),
            NodeProtocol::Rest => Box::new(RestNode::new(&config)?),
        };

        info!(
            address = %config.address,
            port = config.port,
            protocol = %config.protocol,
            "Node bridge created"
        );

        Ok(Self {
            protocol: config.protocol,
            transport,
        })
    }

    /// Wrap an already built transport
    pub fn with_transport(protocol: NodeProtocol, transport: Box<dyn NodeTransport>) -> Self {
        Self {
            protocol,
            transport,
        }
    }

    pub fn protocol(&self) -> NodeProtocol {
        self.protocol
    }

    pub fn controller(&self) -> &Arc<Controller> {
        self.transport.controller()
    }

    pub async fn start(
        &self,
        config: impl Into<String>,
        backend_type: BackendType,
        users: Vec<User>,
        keep_alive: u64,
    ) -> Result<()> {
        self.transport
            .start(config.into(), backend_type, users, keep_alive)
            .await
    }

    pub async fn stop(&self) {
        self.transport.stop().await
    }

    pub async fn info(&self) -> Result<BaseInfoResponse> {
        self.transport.info().await
    }

    pub async fn health(&self) -> Health {
        self.controller().health().await
    }

    /// Fails with `NotConnected` unless a session is active
    pub async fn connected(&self) -> Result<()> {
        self.controller().connected().await
    }

    pub async fn node_version(&self) -> String {
        self.controller().node_version().await
    }

    pub async fn core_version(&self) -> String {
        self.controller().core_version().await
    }

    pub async fn system_stats(&self) -> Result<SystemStatsResponse> {
        self.transport.system_stats().await
    }

    pub async fn backend_stats(&self) -> Result<BackendStatsResponse> {
        self.transport.backend_stats().await
    }

    pub async fn stats(&self, reset: bool, name: &str, stat_type: StatType) -> Result<StatResponse> {
        self.transport.stats(reset, name, stat_type).await
    }

    pub async fn outbounds_stats(&self, reset: bool) -> Result<StatResponse> {
        self.stats(reset, "", StatType::Outbounds).await
    }

    pub async fn outbound_stats(&self, tag: &str, reset: bool) -> Result<StatResponse> {
        self.stats(reset, tag, StatType::Outbound).await
    }

    pub async fn inbounds_stats(&self, reset: bool) -> Result<StatResponse> {
        self.stats(reset, "", StatType::Inbounds).await
    }

    pub async fn inbound_stats(&self, tag: &str, reset: bool) -> Result<StatResponse> {
        self.stats(reset, tag, StatType::Inbound).await
    }

    pub async fn users_stats(&self, reset: bool) -> Result<StatResponse> {
        self.stats(reset, "", StatType::UsersStat).await
    }

    pub async fn user_stats(&self, email: &str, reset: bool) -> Result<StatResponse> {
        self.stats(reset, email, StatType::UserStat).await
    }

    pub async fn user_online_stat(&self, email: &str) -> Result<OnlineStatResponse> {
        self.transport.user_online_stat(email).await
    }

    pub async fn user_online_ip_list(&self, email: &str) -> Result<StatsOnlineIpListResponse> {
        self.transport.user_online_ip_list(email).await
    }

    pub async fn sync_users(&self, users: Vec<User>) -> Result<()> {
        self.transport.sync_users(users).await
    }

    /// Queue one user for the background synchroniser
    pub async fn update_user(&self, user: User) -> Result<()> {
        self.controller().update_user(user).await
    }

    /// Queue a user for removal from every inbound
    pub async fn remove_user(&self, user: User) -> Result<()> {
        self.controller().remove_user(user).await
    }

    pub async fn logs(&self) -> Result<LogReceiver> {
        self.controller().logs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use uuid::Uuid;

    const CA: &str = include_str!("../tests/fixtures/ca.pem");

    #[tokio::test]
    async fn test_new_rejects_empty_address() {
        let config = NodeConfig::new("", 62050, NodeProtocol::Grpc, CA, Uuid::new_v4());
        assert!(matches!(Node::new(config), Err(BridgeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_new_rejects_zero_port() {
        let config = NodeConfig::new("127.0.0.1", 0, NodeProtocol::Rest, CA, Uuid::new_v4());
        assert!(matches!(Node::new(config), Err(BridgeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_grpc_node_guards_calls_until_started() {
        let config = NodeConfig::new("127.0.0.1", 62050, NodeProtocol::Grpc, CA, Uuid::new_v4());
        let node = Node::new(config).unwrap();

        assert_eq!(node.protocol(), NodeProtocol::Grpc);
        assert_eq!(node.health().await, Health::NotConnected);
        assert!(matches!(node.info().await, Err(BridgeError::NotConnected)));
        assert!(matches!(node.users_stats(false).await, Err(BridgeError::NotConnected)));
        assert!(matches!(node.sync_users(vec![]).await, Err(BridgeError::NotConnected)));
        assert!(matches!(node.logs().await, Err(BridgeError::NotConnected)));

        // Stopping an idle node is a no-op
        node.stop().await;
        assert_eq!(node.health().await, Health::NotConnected);
    }
}
