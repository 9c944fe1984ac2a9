use node_bridge_proto::{
    BackendStatsResponse, Empty, OnlineStatResponse, StatRequest, StatResponse, StatType,
    StatsOnlineIpListResponse, SystemStatsResponse,
};

use super::RpcClient;
use crate::error::Result;

impl RpcClient {
    pub(crate) async fn system_stats(&self) -> Result<SystemStatsResponse> {
        let request = self.request(Empty {}, Some(self.timings.request_timeout()));
        let response = self.client.clone().get_system_stats(request).await?;
        Ok(response.into_inner())
    }

    /// Also used as the health probe
    pub(crate) async fn backend_stats(&self) -> Result<BackendStatsResponse> {
        let request = self.request(Empty {}, Some(self.timings.request_timeout()));
        let response = self.client.clone().get_backend_stats(request).await?;
        Ok(response.into_inner())
    }

    pub(crate) async fn stats(
        &self,
        reset: bool,
        name: &str,
        stat_type: StatType,
    ) -> Result<StatResponse> {
        let message = StatRequest {
            name: name.to_string(),
            reset,
            r#type: stat_type as i32,
        };
        let request = self.request(message, Some(self.timings.request_timeout()));
        let response = self.client.clone().get_stats(request).await?;
        Ok(response.into_inner())
    }

    pub(crate) async fn user_online_stat(&self, email: &str) -> Result<OnlineStatResponse> {
        let request = self.request(online_request(email), Some(self.timings.request_timeout()));
        let response = self.client.clone().get_user_online_stats(request).await?;
        Ok(response.into_inner())
    }

    pub(crate) async fn user_online_ip_list(
        &self,
        email: &str,
    ) -> Result<StatsOnlineIpListResponse> {
        let request = self.request(online_request(email), Some(self.timings.request_timeout()));
        let response = self
            .client
            .clone()
            .get_user_online_ip_list_stats(request)
            .await?;
        Ok(response.into_inner())
    }
}

fn online_request(email: &str) -> StatRequest {
    StatRequest {
        name: email.to_string(),
        ..Default::default()
    }
}
