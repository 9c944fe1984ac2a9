//! Transport-independent background loops.
//!
//! Each session runs three tasks bound to one `CancellationToken`: the health
//! prober, the log streamer and the user synchroniser. The transports supply
//! the network calls; the loops here decide when to call them.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{Controller, Health};
use crate::error::{BridgeError, Result};

/// Outcome of waiting for a usable session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    Proceed,
    Exit,
}

/// Intervals shared by the background loops of one session
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTimings {
    pub health_interval: Duration,
    pub broken_backoff: Duration,
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Block until the node is healthy.
///
/// A broken node is re-checked after `backoff`. Teardown or cancellation
/// ends the wait with `Gate::Exit`.
pub(crate) async fn wait_until_healthy(
    controller: &Controller,
    cancel: &CancellationToken,
    backoff: Duration,
    task: &'static str,
) -> Gate {
    loop {
        if cancel.is_cancelled() {
            return Gate::Exit;
        }
        match controller.health().await {
            Health::Healthy => return Gate::Proceed,
            Health::NotConnected => {
                debug!(task, "Node not connected, task exiting");
                return Gate::Exit;
            }
            Health::Broken => {
                debug!(task, backoff_ms = backoff.as_millis() as u64, "Node broken, backing off");
                if !sleep_or_cancel(cancel, backoff).await {
                    return Gate::Exit;
                }
            }
        }
    }
}

/// Discard notifications that arrived before the last health check
pub(crate) fn drain_notifications(notifications: &mut mpsc::Receiver<()>) {
    while notifications.try_recv().is_ok() {}
}

/// Mark the session broken if `err` says the node dropped it
pub(crate) async fn report_failure(
    controller: &Controller,
    epoch: u64,
    task: &'static str,
    err: &BridgeError,
) {
    if err.invalidates_session() {
        warn!(task, error = %err, "Node rejected the session");
        controller.set_health_in(epoch, Health::Broken).await;
    } else {
        debug!(task, error = %err, "Background call failed");
    }
}

/// Probe the node every `interval` and record the result.
///
/// Health is only written when the outcome differs from the last observed
/// state, so a steady node causes no lock contention.
pub(crate) async fn run_health_prober<F, Fut>(
    controller: Arc<Controller>,
    epoch: u64,
    cancel: CancellationToken,
    interval: Duration,
    mut probe: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    debug!(epoch, "Health prober started");
    loop {
        let last = controller.health().await;
        if last == Health::NotConnected {
            break;
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = probe() => outcome,
        };

        match outcome {
            Err(err) if last != Health::Broken => {
                warn!(error = %err, "Health probe failed");
                controller.set_health_in(epoch, Health::Broken).await;
            }
            Ok(()) if last != Health::Healthy => {
                info!("Health probe succeeded");
                controller.set_health_in(epoch, Health::Healthy).await;
            }
            _ => {}
        }

        if !sleep_or_cancel(&cancel, interval).await {
            break;
        }
    }
    debug!(epoch, "Health prober stopped");
}

/// Why a log source stopped being read
#[derive(Debug)]
pub(crate) enum SourceEnd {
    Exhausted,
    Failed(BridgeError),
    Cancelled,
    /// Nobody can read the log queue any more
    QueueClosed,
}

/// Copy non-blank lines from `source` into the log queue, trimmed.
///
/// Waits while the queue is full.
pub(crate) async fn forward_lines<S>(
    mut source: S,
    sink: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> SourceEnd
where
    S: Stream<Item = Result<String>> + Unpin,
{
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return SourceEnd::Cancelled,
            item = source.next() => item,
        };

        let line = match item {
            None => return SourceEnd::Exhausted,
            Some(Err(err)) => return SourceEnd::Failed(err),
            Some(Ok(line)) => line,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => return SourceEnd::Cancelled,
            sent = sink.send(line.to_string()) => {
                if sent.is_err() {
                    return SourceEnd::QueueClosed;
                }
            }
        }
    }
}

/// Keep a log source open while the node is healthy.
///
/// `open` is called again after the source ends or fails, with a pause of one
/// health interval in between.
pub(crate) async fn run_log_streamer<F, Fut, S>(
    controller: Arc<Controller>,
    epoch: u64,
    cancel: CancellationToken,
    timings: LoopTimings,
    logs: mpsc::Sender<String>,
    mut open: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    S: Stream<Item = Result<String>> + Unpin,
{
    const TASK: &str = "log_streamer";
    debug!(epoch, "Log streamer started");

    loop {
        if wait_until_healthy(&controller, &cancel, timings.broken_backoff, TASK).await
            == Gate::Exit
        {
            break;
        }

        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = open() => opened,
        };

        match opened {
            Err(err) => report_failure(&controller, epoch, TASK, &err).await,
            Ok(source) => match forward_lines(source, &logs, &cancel).await {
                SourceEnd::Cancelled | SourceEnd::QueueClosed => break,
                SourceEnd::Exhausted => debug!("Log stream closed by node"),
                SourceEnd::Failed(err) => report_failure(&controller, epoch, TASK, &err).await,
            },
        }

        if !sleep_or_cancel(&cancel, timings.health_interval).await {
            break;
        }
    }
    debug!(epoch, "Log streamer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::controller::NodeIdentity;
    use crate::logging::init_test_logging;
    use futures::stream;
    use serde_json::Map;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    fn lines(items: &[&str]) -> impl Stream<Item = Result<String>> + Unpin {
        stream::iter(
            items
                .iter()
                .map(|s| Ok(s.to_string()))
                .collect::<Vec<Result<String>>>(),
        )
    }

    async fn connected() -> (Arc<Controller>, u64) {
        init_test_logging();
        let controller = Arc::new(Controller::new("key", QueueConfig::default(), Map::new()));
        let epoch = controller.connect(NodeIdentity::new("1", "1")).await;
        (controller, epoch)
    }

    #[tokio::test]
    async fn test_forward_lines_skips_blank() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let end = forward_lines(lines(&["", "hello", "  ", "world\n"]), &tx, &cancel).await;
        assert!(matches!(end, SourceEnd::Exhausted));
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("world"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_lines_reports_failure() {
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let source = stream::iter(vec![
            Ok("a".to_string()),
            Err(BridgeError::Stream("reset".to_string())),
        ]);

        let end = forward_lines(source, &tx, &cancel).await;
        assert!(matches!(end, SourceEnd::Failed(BridgeError::Stream(_))));
    }

    #[tokio::test]
    async fn test_forward_lines_cancel_while_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let end = forward_lines(lines(&["a", "b", "c"]), &tx, &cancel).await;
        assert!(matches!(end, SourceEnd::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prober_tracks_probe_results() {
        let (controller, epoch) = connected().await;
        let cancel = CancellationToken::new();
        let results = Arc::new(StdMutex::new(VecDeque::from(vec![
            Ok(()),
            Err(BridgeError::Stream("down".to_string())),
            Ok(()),
        ])));

        let probe_results = Arc::clone(&results);
        let handle = tokio::spawn(run_health_prober(
            Arc::clone(&controller),
            epoch,
            cancel.clone(),
            Duration::from_secs(2),
            move || {
                let next = probe_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
                async move { next }
            },
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.health().await, Health::Healthy);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.health().await, Health::Broken);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.health().await, Health::Healthy);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_exits_on_cancel_during_backoff() {
        let (controller, _) = connected().await;
        controller.set_health(Health::Broken).await;
        let cancel = CancellationToken::new();

        let gate_controller = Arc::clone(&controller);
        let gate_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            wait_until_healthy(&gate_controller, &gate_cancel, Duration::from_secs(5), "test").await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Gate::Exit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_resumes_after_recovery() {
        let (controller, _) = connected().await;
        controller.set_health(Health::Broken).await;
        let cancel = CancellationToken::new();

        let gate_controller = Arc::clone(&controller);
        let gate_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            wait_until_healthy(&gate_controller, &gate_cancel, Duration::from_secs(5), "test").await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.set_health(Health::Healthy).await;
        assert_eq!(handle.await.unwrap(), Gate::Proceed);
    }

    #[tokio::test]
    async fn test_gate_exits_when_not_connected() {
        let controller = Controller::new("key", QueueConfig::default(), Map::new());
        let cancel = CancellationToken::new();
        let gate = wait_until_healthy(&controller, &cancel, Duration::from_secs(5), "test").await;
        assert_eq!(gate, Gate::Exit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_streamer_reopens_and_forwards() {
        let (controller, epoch) = connected().await;
        let cancel = CancellationToken::new();
        let queues = controller.session_queues().await;
        let logs = controller.logs().await.unwrap();
        let timings = LoopTimings {
            health_interval: Duration::from_secs(2),
            broken_backoff: Duration::from_secs(5),
        };

        let mut opened = 0;
        let handle = tokio::spawn(run_log_streamer(
            Arc::clone(&controller),
            epoch,
            cancel.clone(),
            timings,
            queues.logs,
            move || {
                opened += 1;
                let batch = vec![Ok(String::new()), Ok(format!("line {}", opened))];
                async move { Ok(stream::iter(batch)) }
            },
        ));

        assert_eq!(logs.recv().await.as_deref(), Some("line 1"));
        assert_eq!(logs.recv().await.as_deref(), Some("line 2"));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_streamer_marks_broken_on_rejected_session() {
        let (controller, epoch) = connected().await;
        let cancel = CancellationToken::new();
        let queues = controller.session_queues().await;
        let timings = LoopTimings {
            health_interval: Duration::from_secs(2),
            broken_backoff: Duration::from_secs(5),
        };

        let handle = tokio::spawn(run_log_streamer(
            Arc::clone(&controller),
            epoch,
            cancel.clone(),
            timings,
            queues.logs,
            || async {
                Err::<stream::Empty<Result<String>>, _>(BridgeError::Status(
                    tonic::Status::unauthenticated("expired"),
                ))
            },
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.health().await, Health::Broken);

        cancel.cancel();
        handle.await.unwrap();
    }
}
