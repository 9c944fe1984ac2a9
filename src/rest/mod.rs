//! REST transport: stateless HTTPS requests with protobuf bodies

mod logs;
mod stats;
mod users;

use async_trait::async_trait;
use prost::Message;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use node_bridge_proto::{
    Backend, BackendStatsResponse, BackendType, BaseInfoResponse, Empty, OnlineStatResponse,
    StatResponse, StatType, StatsOnlineIpListResponse, SystemStatsResponse, User,
};

use crate::config::{NodeConfig, Timings};
use crate::controller::{Controller, NodeIdentity};
use crate::error::{BridgeError, Result};
use crate::node::NodeTransport;
use crate::tasks::{self, LoopTimings};
use crate::tls;

pub(crate) const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// HTTP client bound to one node's base URL; cheap to clone
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    http: reqwest::Client,
    base_url: String,
    controller: Arc<Controller>,
    timings: Timings,
}

impl RestClient {
    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Send `body` with the current credential and decode the reply
    async fn send<Req, Resp>(
        &self,
        method: Method,
        endpoint: &str,
        body: &Req,
        timeout: Option<Duration>,
    ) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let credential = self.controller.credential().await;
        self.send_as(&credential, method, endpoint, body, timeout)
            .await
    }

    async fn send_as<Req, Resp>(
        &self,
        credential: &str,
        method: Method,
        endpoint: &str,
        body: &Req,
        timeout: Option<Duration>,
    ) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut request = self
            .http
            .request(method, self.url(endpoint))
            .bearer_auth(credential)
            .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .body(body.encode_to_vec());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = check_status(request.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(Resp::decode(bytes)?)
    }

    /// Ordinary request with the default deadline
    async fn call<Req, Resp>(&self, method: Method, endpoint: &str, body: &Req) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        self.send(
            method,
            endpoint,
            body,
            Some(self.timings.rest_request_timeout()),
        )
        .await
    }
}

/// Turn a non-2xx reply into `UnexpectedStatus`
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BridgeError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    })
}

/// Node reached over REST
pub struct RestNode {
    controller: Arc<Controller>,
    rest: RestClient,
    session: Mutex<Option<CancellationToken>>,
}

impl RestNode {
    /// Build an HTTPS client trusting the configured CA
    pub fn new(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        let http = tls::rest_client(config)?;
        let base_url = format!("https://{}", config.authority());
        Ok(Self::with_http_client(config, http, base_url))
    }

    /// Use a caller-supplied HTTP client and base URL, e.g. behind a proxy
    pub fn with_http_client(
        config: &NodeConfig,
        http: reqwest::Client,
        base_url: impl Into<String>,
    ) -> Self {
        let controller = Arc::new(Controller::new(
            config.api_key.to_string(),
            config.queues,
            config.extra.clone(),
        ));
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "REST client configured");

        Self {
            rest: RestClient {
                http,
                base_url,
                controller: Arc::clone(&controller),
                timings: config.timings,
            },
            controller,
            session: Mutex::new(None),
        }
    }

    fn loop_timings(&self) -> LoopTimings {
        LoopTimings {
            health_interval: self.rest.timings.health_interval(),
            broken_backoff: self.rest.timings.broken_backoff(),
        }
    }

    /// Tear down the running session. The caller holds the session lock, so
    /// a concurrent `start` cannot interleave.
    async fn stop_locked(&self, session: &mut Option<CancellationToken>) {
        if let Some(cancel) = session.take() {
            cancel.cancel();
        }
        if self.controller.connected().await.is_err() {
            return;
        }

        // The session token dies with the session; keep it for the stop call
        let credential = self.controller.credential().await;
        self.controller.disconnect().await;

        let stopped: Result<Empty> = self
            .rest
            .send_as(
                &credential,
                Method::PUT,
                "stop",
                &Empty {},
                Some(self.rest.timings.stop_timeout()),
            )
            .await;
        if let Err(e) = stopped {
            debug!(error = %e, "Remote stop failed");
        }
        info!(base_url = %self.rest.base_url, "REST session stopped");
    }

    async fn spawn_session_tasks(&self, cancel: &CancellationToken) {
        let queues = self.controller.session_queues().await;
        let epoch = queues.epoch;
        let timings = self.loop_timings();

        let probe_rest = self.rest.clone();
        tokio::spawn(tasks::run_health_prober(
            Arc::clone(&self.controller),
            epoch,
            cancel.clone(),
            timings.health_interval,
            move || {
                let rest = probe_rest.clone();
                async move { rest.backend_stats().await.map(|_| ()) }
            },
        ));

        tokio::spawn(logs::run_log_streamer(
            Arc::clone(&self.controller),
            epoch,
            cancel.clone(),
            timings,
            self.rest.clone(),
            queues.logs.clone(),
        ));

        tokio::spawn(users::run_user_sync(
            Arc::clone(&self.controller),
            cancel.clone(),
            timings,
            self.rest.clone(),
            queues,
        ));
    }
}

#[async_trait]
impl NodeTransport for RestNode {
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

        let info: BaseInfoResponse = self
            .rest
            .send(
                Method::POST,
                "start",
                &backend,
                Some(self.rest.timings.start_timeout()),
            )
            .await
            .map_err(BridgeError::into_start_error)?;

        let identity =
            NodeIdentity::new(info.node_version, info.core_version).with_session(info.session_id);
        self.controller.connect(identity).await;

        let cancel = CancellationToken::new();
        self.spawn_session_tasks(&cancel).await;
        *session = Some(cancel);

        info!(base_url = %self.rest.base_url, "REST session started");
        Ok(())
    }

    async fn stop(&self) {
        let mut session = self.session.lock().await;
        self.stop_locked(&mut session).await;
    }

    async fn info(&self) -> Result<BaseInfoResponse> {
        self.controller.connected().await?;
        self.rest.call(Method::GET, "info", &Empty {}).await
    }

    async fn system_stats(&self) -> Result<SystemStatsResponse> {
        self.controller.connected().await?;
        self.rest.system_stats().await
    }

    async fn backend_stats(&self) -> Result<BackendStatsResponse> {
        self.controller.connected().await?;
        self.rest.backend_stats().await
    }

    async fn stats(&self, reset: bool, name: &str, stat_type: StatType) -> Result<StatResponse> {
        self.controller.connected().await?;
        self.rest.stats(reset, name, stat_type).await
    }

    async fn user_online_stat(&self, email: &str) -> Result<OnlineStatResponse> {
        self.controller.connected().await?;
        self.rest.user_online_stat(email).await
    }

    async fn user_online_ip_list(&self, email: &str) -> Result<StatsOnlineIpListResponse> {
        self.controller.connected().await?;
        self.rest.user_online_ip_list(email).await
    }

    async fn sync_users(&self, users: Vec<User>) -> Result<()> {
        self.controller.connected().await?;
        let _session = self.session.lock().await;
        self.rest.sync_users(users).await
    }
}
