use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use node_bridge_proto::{Empty, Log};

use super::RpcClient;
use crate::controller::Controller;
use crate::error::{BridgeError, Result};
use crate::tasks::{self, LoopTimings};

impl RpcClient {
    /// Open the server-streaming log feed. No deadline: it lives until the
    /// node closes it or the session ends.
    pub(crate) async fn open_logs(&self) -> Result<BoxStream<'static, Result<String>>> {
        let request = self.request(Empty {}, None);
        let stream = self.client.clone().get_logs(request).await?.into_inner();
        Ok(log_details(stream))
    }
}

fn log_details<S>(entries: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<Log, tonic::Status>> + Send + 'static,
{
    entries
        .map(|entry| entry.map(|log| log.detail).map_err(BridgeError::from))
        .boxed()
}

pub(super) async fn run_log_streamer(
    controller: Arc<Controller>,
    epoch: u64,
    cancel: CancellationToken,
    timings: LoopTimings,
    rpc: RpcClient,
    logs: mpsc::Sender<String>,
) {
    tasks::run_log_streamer(controller, epoch, cancel, timings, logs, move || {
        let rpc = rpc.clone();
        async move { rpc.open_logs().await }
    })
    .await
}
