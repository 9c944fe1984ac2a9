use reqwest::Method;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use node_bridge_proto::{Empty, User, Users};

use super::RestClient;
use crate::controller::{Controller, SessionQueues};
use crate::error::Result;
use crate::tasks::{self, Gate, LoopTimings};

const TASK: &str = "user_sync";

impl RestClient {
    pub(crate) async fn sync_users(&self, users: Vec<User>) -> Result<()> {
        let _: Empty = self
            .send(
                Method::PUT,
                "users/sync",
                &Users { users },
                Some(self.timings.sync_timeout()),
            )
            .await?;
        Ok(())
    }

    async fn sync_user(&self, user: &User) -> Result<()> {
        let _: Empty = self.call(Method::PUT, "user/sync", user).await?;
        Ok(())
    }
}

/// Push queued user updates one request at a time.
///
/// A failed push is logged and skipped; health is re-checked before every
/// update.
pub(super) async fn run_user_sync(
    controller: Arc<Controller>,
    cancel: CancellationToken,
    timings: LoopTimings,
    rest: RestClient,
    queues: SessionQueues,
) {
    let epoch = queues.epoch;
    let mut updates = queues.user_updates.lock().await;
    let mut notifications = queues.notifications.lock().await;
    debug!(epoch, "User synchroniser started");

    loop {
        if tasks::wait_until_healthy(&controller, &cancel, timings.broken_backoff, TASK).await
            == Gate::Exit
        {
            break;
        }

        let user = tokio::select! {
            _ = cancel.cancelled() => break,
            notified = notifications.recv() => match notified {
                Some(()) => continue,
                None => break,
            },
            user = updates.recv() => match user {
                Some(user) => user,
                None => break,
            },
        };

        let pushed = tokio::select! {
            _ = cancel.cancelled() => break,
            pushed = rest.sync_user(&user) => pushed,
        };
        match pushed {
            Ok(()) => debug!(email = %user.email, "User update sent"),
            Err(err) => tasks::report_failure(&controller, epoch, TASK, &err).await,
        }
    }
    debug!(epoch, "User synchroniser stopped");
}
