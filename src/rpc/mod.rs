//! gRPC transport: one persistent TLS channel, streaming logs and user updates

mod logs;
mod stats;
mod users;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Endpoint;
use tonic::Request;
use tracing::{debug, info};

use node_bridge_proto::{
    Backend, BackendStatsResponse, BackendType, BaseInfoResponse, Empty, NodeServiceClient,
    OnlineStatResponse, StatResponse, StatType, StatsOnlineIpListResponse, SystemStatsResponse,
    User,
};

use crate::config::{NodeConfig, Timings};
use crate::controller::{Controller, NodeIdentity};
use crate::error::{BridgeError, Result};
use crate::node::NodeTransport;
use crate::tasks::{self, LoopTimings};
use crate::tls;

/// Authenticated handle on the node service; cheap to clone
#[derive(Debug, Clone)]
pub(crate) struct RpcClient {
    client: NodeServiceClient,
    bearer: MetadataValue<Ascii>,
    timings: Timings,
}

impl RpcClient {
    pub(crate) fn new(client: NodeServiceClient, api_key: &str, timings: Timings) -> Result<Self> {
        Ok(Self {
            client,
            bearer: tls::bearer_metadata(api_key)?,
            timings,
        })
    }

    /// Wrap `message` with the credential and an optional deadline
    fn request<T>(&self, message: T, timeout: Option<Duration>) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert("authorization", self.bearer.clone());
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }
        request
    }

    async fn start(&self, backend: Backend) -> Result<BaseInfoResponse> {
        let request = self.request(backend, Some(self.timings.start_timeout()));
        self.client
            .clone()
            .start(request)
            .await
            .map(|response| response.into_inner())
            .map_err(BridgeError::from_start_status)
    }

    async fn stop(&self) -> Result<()> {
        let timeout = self.timings.stop_timeout();
        let request = self.request(Empty {}, Some(timeout));
        let mut client = self.client.clone();
        match tokio::time::timeout(timeout, client.stop(request)).await {
            Ok(result) => result.map(|_| ()).map_err(BridgeError::from),
            Err(_) => Err(BridgeError::Status(tonic::Status::deadline_exceeded(
                "stop request timed out",
            ))),
        }
    }

    async fn base_info(&self) -> Result<BaseInfoResponse> {
        let request = self.request(Empty {}, Some(self.timings.request_timeout()));
        let response = self.client.clone().get_base_info(request).await?;
        Ok(response.into_inner())
    }
}

/// Node reached over gRPC
pub struct RpcNode {
    controller: Arc<Controller>,
    rpc: RpcClient,
    /// Cancels the background tasks of the running session
    session: Mutex<Option<CancellationToken>>,
}

impl RpcNode {
    /// Build the TLS channel. It connects lazily on the first call.
    pub fn new(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        let tls = tls::grpc_tls_config(config)?;

        let endpoint = Endpoint::from_shared(format!("https://{}", config.authority()))
            .map_err(|e| BridgeError::Configuration(format!("Invalid node address: {}", e)))?
            .tls_config(tls)
            .map_err(|e| BridgeError::Tls(e.to_string()))?
            .connect_timeout(config.timings.start_timeout())
            .http2_keep_alive_interval(config.timings.keep_alive_interval())
            .keep_alive_while_idle(true);

        let client = NodeServiceClient::new(endpoint.connect_lazy());
        let api_key = config.api_key.to_string();
        let controller = Arc::new(Controller::new(
            api_key.clone(),
            config.queues,
            config.extra.clone(),
        ));

        debug!(authority = %config.authority(), "gRPC channel configured");
        Ok(Self {
            controller,
            rpc: RpcClient::new(client, &api_key, config.timings)?,
            session: Mutex::new(None),
        })
    }

    fn loop_timings(&self) -> LoopTimings {
        LoopTimings {
            health_interval: self.rpc.timings.health_interval(),
            broken_backoff: self.rpc.timings.broken_backoff(),
        }
    }

    /// Tear down the running session; the caller holds the session lock
    async fn stop_locked(&self, session: &mut Option<CancellationToken>) {
        if let Some(cancel) = session.take() {
            cancel.cancel();
        }
        if self.controller.connected().await.is_err() {
            return;
        }
        self.controller.disconnect().await;

        if let Err(e) = self.rpc.stop().await {
            debug!(error = %e, "Remote stop failed");
        }
        info!("gRPC session stopped");
    }

    async fn spawn_session_tasks(&self, cancel: &CancellationToken) {
        let queues = self.controller.session_queues().await;
        let epoch = queues.epoch;
        let timings = self.loop_timings();

        let probe_rpc = self.rpc.clone();
        tokio::spawn(tasks::run_health_prober(
            Arc::clone(&self.controller),
            epoch,
            cancel.clone(),
            timings.health_interval,
            move || {
                let rpc = probe_rpc.clone();
                async move { rpc.backend_stats().await.map(|_| ()) }
            },
        ));

        tokio::spawn(logs::run_log_streamer(
            Arc::clone(&self.controller),
            epoch,
            cancel.clone(),
            timings,
            self.rpc.clone(),
            queues.logs.clone(),
        ));

        tokio::spawn(users::run_user_sync(
            Arc::clone(&self.controller),
            cancel.clone(),
            timings,
            self.rpc.clone(),
            queues,
        ));
    }
}

#[async_trait]
impl NodeTransport for RpcNode {
    fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    async fn start(
        &self,
        config: String,
        backend_type: BackendType,
        users: Vec<User>,
        keep_alive: u64,
    ) -> Result<()> {
        let mut session = self.session.lock().await;
        self.stop_locked(&mut session).await;

        let backend = Backend {
            r#type: backend_type as i32,
            config,
            users,
            keep_alive,
        };

        let info = self.rpc.start(backend).await?;
        self.controller
            .connect(NodeIdentity::new(info.node_version, info.core_version))
            .await;

        let cancel = CancellationToken::new();
        self.spawn_session_tasks(&cancel).await;
        *session = Some(cancel);

        info!("gRPC session started");
        Ok(())
    }

    async fn stop(&self) {
        let mut session = self.session.lock().await;
        self.stop_locked(&mut session).await;
    }

    async fn info(&self) -> Result<BaseInfoResponse> {
        self.controller.connected().await?;
        self.rpc.base_info().await
    }

    async fn system_stats(&self) -> Result<SystemStatsResponse> {
        self.controller.connected().await?;
        self.rpc.system_stats().await
    }

    async fn backend_stats(&self) -> Result<BackendStatsResponse> {
        self.controller.connected().await?;
        self.rpc.backend_stats().await
    }

    async fn stats(&self, reset: bool, name: &str, stat_type: StatType) -> Result<StatResponse> {
        self.controller.connected().await?;
        self.rpc.stats(reset, name, stat_type).await
    }

    async fn user_online_stat(&self, email: &str) -> Result<OnlineStatResponse> {
        self.controller.connected().await?;
        self.rpc.user_online_stat(email).await
    }

    async fn user_online_ip_list(&self, email: &str) -> Result<StatsOnlineIpListResponse> {
        self.controller.connected().await?;
        self.rpc.user_online_ip_list(email).await
    }

    async fn sync_users(&self, users: Vec<User>) -> Result<()> {
        self.controller.connected().await?;
        let _session = self.session.lock().await;
        self.rpc.sync_users(users).await
    }
}
