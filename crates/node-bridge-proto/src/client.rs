//! Client stub for the `service.NodeService` gRPC service.

use futures::Stream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::GrpcMethod;
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

use crate::messages::{
    Backend, BackendStatsResponse, BaseInfoResponse, Empty, Log, OnlineStatResponse,
    StatRequest, StatResponse, StatsOnlineIpListResponse, SystemStatsResponse, User, Users,
};

const SERVICE: &str = "service.NodeService";

/// gRPC client for a node.
///
/// Cheap to clone: the underlying `Channel` is reference counted.
#[derive(Debug, Clone)]
pub struct NodeServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl NodeServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e)))
    }

    async fn unary<Req, Resp>(
        &mut self,
        mut request: Request<Req>,
        method: &'static str,
        path: &'static str,
    ) -> Result<Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        self.ready().await?;
        let codec = tonic_prost::ProstCodec::<Req, Resp>::default();
        request
            .extensions_mut()
            .insert(GrpcMethod::new(SERVICE, method));
        self.inner
            .unary(request, PathAndQuery::from_static(path), codec)
            .await
    }

    pub async fn start(
        &mut self,
        request: Request<Backend>,
    ) -> Result<Response<BaseInfoResponse>, Status> {
        self.unary(request, "Start", "/service.NodeService/Start")
            .await
    }

    pub async fn stop(&mut self, request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.unary(request, "Stop", "/service.NodeService/Stop").await
    }

    pub async fn get_base_info(
        &mut self,
        request: Request<Empty>,
    ) -> Result<Response<BaseInfoResponse>, Status> {
        self.unary(request, "GetBaseInfo", "/service.NodeService/GetBaseInfo")
            .await
    }

    pub async fn get_system_stats(
        &mut self,
        request: Request<Empty>,
    ) -> Result<Response<SystemStatsResponse>, Status> {
        self.unary(
            request,
            "GetSystemStats",
            "/service.NodeService/GetSystemStats",
        )
        .await
    }

    pub async fn get_backend_stats(
        &mut self,
        request: Request<Empty>,
    ) -> Result<Response<BackendStatsResponse>, Status> {
        self.unary(
            request,
            "GetBackendStats",
            "/service.NodeService/GetBackendStats",
        )
        .await
    }

    pub async fn get_stats(
        &mut self,
        request: Request<StatRequest>,
    ) -> Result<Response<StatResponse>, Status> {
        self.unary(request, "GetStats", "/service.NodeService/GetStats")
            .await
    }

    pub async fn get_user_online_stats(
        &mut self,
        request: Request<StatRequest>,
    ) -> Result<Response<OnlineStatResponse>, Status> {
        self.unary(
            request,
            "GetUserOnlineStats",
            "/service.NodeService/GetUserOnlineStats",
        )
        .await
    }

    pub async fn get_user_online_ip_list_stats(
        &mut self,
        request: Request<StatRequest>,
    ) -> Result<Response<StatsOnlineIpListResponse>, Status> {
        self.unary(
            request,
            "GetUserOnlineIpListStats",
            "/service.NodeService/GetUserOnlineIpListStats",
        )
        .await
    }

    pub async fn sync_users(&mut self, request: Request<Users>) -> Result<Response<Empty>, Status> {
        self.unary(request, "SyncUsers", "/service.NodeService/SyncUsers")
            .await
    }

    /// Server-streaming log feed, one `Log` per line
    pub async fn get_logs(
        &mut self,
        mut request: Request<Empty>,
    ) -> Result<Response<Streaming<Log>>, Status> {
        self.ready().await?;
        let codec = tonic_prost::ProstCodec::<Empty, Log>::default();
        request
            .extensions_mut()
            .insert(GrpcMethod::new(SERVICE, "GetLogs"));
        self.inner
            .server_streaming(
                request,
                PathAndQuery::from_static("/service.NodeService/GetLogs"),
                codec,
            )
            .await
    }

    /// Client-streaming user updates; the call completes when the stream ends
    pub async fn sync_user<S>(&mut self, mut request: Request<S>) -> Result<Response<Empty>, Status>
    where
        S: Stream<Item = User> + Send + 'static,
    {
        self.ready().await?;
        let codec = tonic_prost::ProstCodec::<User, Empty>::default();
        request
            .extensions_mut()
            .insert(GrpcMethod::new(SERVICE, "SyncUser"));
        self.inner
            .client_streaming(
                request,
                PathAndQuery::from_static("/service.NodeService/SyncUser"),
                codec,
            )
            .await
    }
}
