use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Method;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::{check_status, RestClient};
use crate::controller::Controller;
use crate::error::{BridgeError, Result};
use crate::tasks::{self, LoopTimings};

/// Longest log line accepted from the node
const MAX_LINE_LENGTH: usize = 64 * 1024;

impl RestClient {
    /// Open the chunked `/logs` body as a stream of lines.
    ///
    /// The request has no deadline; it stays open until the node ends it.
    pub(crate) async fn open_logs(&self) -> Result<BoxStream<'static, Result<String>>> {
        let credential = self.controller.credential().await;
        let response = self
            .http
            .request(Method::GET, self.url("logs"))
            .bearer_auth(credential)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(log_lines(StreamReader::new(body)))
    }
}

/// Split a log body on `\n`. Bytes that are not UTF-8 are replaced, never
/// rejected, so one bad line cannot end the stream.
fn log_lines<R>(body: R) -> BoxStream<'static, Result<String>>
where
    R: AsyncRead + Send + 'static,
{
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
    FramedRead::new(body, codec)
        .map(|line| {
            line.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|e| BridgeError::Stream(e.to_string()))
        })
        .boxed()
}

pub(super) async fn run_log_streamer(
    controller: Arc<Controller>,
    epoch: u64,
    cancel: CancellationToken,
    timings: LoopTimings,
    rest: RestClient,
    logs: mpsc::Sender<String>,
) {
    tasks::run_log_streamer(controller, epoch, cancel, timings, logs, move || {
        let rest = rest.clone();
        async move { rest.open_logs().await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(body: &'static [u8]) -> Vec<String> {
        log_lines(body)
            .map(|line| line.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_kept() {
        let lines = collect(b"\xff\xfe\nhello\n").await;
        assert_eq!(lines, ["\u{fffd}\u{fffd}", "hello"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let lines = collect(b"first\r\nsecond").await;
        assert_eq!(lines, ["first\r", "second"]);
    }
}
