use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use node_bridge_proto::{User, Users};

use super::RpcClient;
use crate::controller::{Controller, SessionQueues};
use crate::error::Result;
use crate::tasks::{self, Gate, LoopTimings};

/// In-flight updates buffered between the queue and the open stream
const STREAM_BUFFER: usize = 16;

const TASK: &str = "user_sync";

/// Request body of one `SyncUser` call
pub(crate) type UserStream = BoxStream<'static, User>;

impl RpcClient {
    pub(crate) async fn sync_users(&self, users: Vec<User>) -> Result<()> {
        let request = self.request(Users { users }, Some(self.timings.sync_timeout()));
        self.client.clone().sync_users(request).await?;
        Ok(())
    }

    /// Client-streaming `SyncUser`; resolves when the node closes the call
    pub(crate) async fn sync_user(&self, updates: UserStream) -> Result<()> {
        let request = self.request(updates, None);
        self.client.clone().sync_user(request).await?;
        Ok(())
    }
}

enum StreamEnd {
    Cancelled,
    /// Health changed; re-check before sending more
    Notified,
    /// The call finished; the node may be gone
    CallEnded,
}

/// Stream over a receiver the synchroniser keeps a handle on, so whatever the
/// call has not pulled yet can be recovered after it is torn down.
fn shared_stream(rx: Arc<Mutex<mpsc::Receiver<User>>>) -> UserStream {
    stream::unfold(rx, |rx| async move {
        let user = rx.lock().await.recv().await?;
        Some((user, rx))
    })
    .boxed()
}

async fn call_ended(
    controller: &Controller,
    epoch: u64,
    result: std::result::Result<Result<()>, JoinError>,
) -> StreamEnd {
    match result {
        Ok(Ok(())) => debug!("Node closed the user sync stream"),
        Ok(Err(err)) => tasks::report_failure(controller, epoch, TASK, &err).await,
        Err(e) => debug!(error = %e, "User sync call aborted"),
    }
    StreamEnd::CallEnded
}

pub(super) async fn run_user_sync(
    controller: Arc<Controller>,
    cancel: CancellationToken,
    timings: LoopTimings,
    rpc: RpcClient,
    queues: SessionQueues,
) {
    sync_user_streams(controller, cancel, timings, queues, move |updates| {
        let rpc = rpc.clone();
        async move { rpc.sync_user(updates).await }
    })
    .await
}

/// Forward queued user updates over client-streaming calls opened by `open`.
///
/// A call is reopened whenever it ends or health changes. Updates it had not
/// pulled yet are taken back and sent first on the next call, in order.
pub(crate) async fn sync_user_streams<F, Fut>(
    controller: Arc<Controller>,
    cancel: CancellationToken,
    timings: LoopTimings,
    queues: SessionQueues,
    mut open: F,
) where
    F: FnMut(UserStream) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let epoch = queues.epoch;
    let mut updates = queues.user_updates.lock().await;
    let mut notifications = queues.notifications.lock().await;
    let mut pending: VecDeque<User> = VecDeque::new();
    debug!(epoch, "User synchroniser started");

    loop {
        if tasks::wait_until_healthy(&controller, &cancel, timings.broken_backoff, TASK).await
            == Gate::Exit
        {
            break;
        }
        tasks::drain_notifications(&mut notifications);

        let (tx, rx) = mpsc::channel::<User>(STREAM_BUFFER);
        let rx = Arc::new(Mutex::new(rx));
        let mut call: JoinHandle<Result<()>> =
            tokio::spawn(open(shared_stream(Arc::clone(&rx))));
        let mut call_done = false;

        let end = loop {
            let user = match pending.pop_front() {
                Some(user) => user,
                None => tokio::select! {
                    _ = cancel.cancelled() => break StreamEnd::Cancelled,
                    result = &mut call => {
                        call_done = true;
                        break call_ended(&controller, epoch, result).await;
                    }
                    notified = notifications.recv() => match notified {
                        Some(()) => {
                            debug!("Health changed, restarting user sync");
                            break StreamEnd::Notified;
                        }
                        None => break StreamEnd::Cancelled,
                    },
                    user = updates.recv() => match user {
                        Some(user) => user,
                        None => break StreamEnd::Cancelled,
                    },
                },
            };

            // Reserve first so an interrupted wait never drops `user`
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    pending.push_front(user);
                    break StreamEnd::Cancelled;
                }
                result = &mut call => {
                    call_done = true;
                    pending.push_front(user);
                    break call_ended(&controller, epoch, result).await;
                }
                permit = tx.reserve() => permit,
            };
            match permit {
                Ok(permit) => {
                    debug!(email = %user.email, "User update handed to stream");
                    permit.send(user);
                }
                Err(_) => {
                    pending.push_front(user);
                    break StreamEnd::CallEnded;
                }
            }
        };

        drop(tx);
        if !call_done {
            call.abort();
            let _ = call.await;
        }

        // Whatever the call never pulled goes back in front, oldest first
        let mut unsent = Vec::new();
        {
            let mut rx = rx.lock().await;
            rx.close();
            while let Ok(user) = rx.try_recv() {
                unsent.push(user);
            }
        }
        if !unsent.is_empty() {
            debug!(count = unsent.len(), "Requeueing updates the stream did not take");
        }
        for user in unsent.into_iter().rev() {
            pending.push_front(user);
        }

        match end {
            StreamEnd::Cancelled => break,
            StreamEnd::Notified => continue,
            StreamEnd::CallEnded => {
                if !tasks::sleep_or_cancel(&cancel, timings.health_interval).await {
                    break;
                }
            }
        }
    }
    debug!(epoch, "User synchroniser stopped");
}
