use reqwest::Method;

use node_bridge_proto::{
    BackendStatsResponse, Empty, OnlineStatResponse, StatRequest, StatResponse, StatType,
    StatsOnlineIpListResponse, SystemStatsResponse,
};

use super::RestClient;
use crate::error::Result;

impl RestClient {
    pub(crate) async fn system_stats(&self) -> Result<SystemStatsResponse> {
        self.call(Method::GET, "stats/system", &Empty {}).await
    }

    pub(crate) async fn backend_stats(&self) -> Result<BackendStatsResponse> {
        self.call(Method::GET, "stats/backend", &Empty {}).await
    }

    pub(crate) async fn stats(
        &self,
        reset: bool,
        name: &str,
        stat_type: StatType,
    ) -> Result<StatResponse> {
        let request = StatRequest {
            name: name.to_string(),
            reset,
            r#type: stat_type as i32,
        };
        self.call(Method::GET, "stats", &request).await
    }

    pub(crate) async fn user_online_stat(&self, email: &str) -> Result<OnlineStatResponse> {
        self.call(Method::GET, "stats/user/online", &online_request(email))
            .await
    }

    pub(crate) async fn user_online_ip_list(
        &self,
        email: &str,
    ) -> Result<StatsOnlineIpListResponse> {
        self.call(Method::GET, "stats/user/online_ip", &online_request(email))
            .await
    }
}

fn online_request(email: &str) -> StatRequest {
    StatRequest {
        name: email.to_string(),
        ..Default::default()
    }
}
