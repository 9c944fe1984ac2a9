//! Controller: connection health, node identity and the per-session queues
//!
//! The controller does no network I/O. Transports drive it:
//!
//! ```text
//!                 connect()
//!  NotConnected ────────────> Healthy <──┐
//!       ^                        │       │ probe ok
//!       │ disconnect()           │ probe failed / session lost
//!       │                        v       │
//!       └──────────────────── Broken ────┘
//! ```
//!
//! Every `connect()`/`disconnect()` starts a new epoch: the three queues are
//! replaced wholesale, so nothing queued in one session is visible in the next.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use node_bridge_proto::User;

use crate::config::QueueConfig;
use crate::error::{BridgeError, Result};

/// Connection health as seen by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Health {
    /// No session; initial state and the state after teardown
    NotConnected,
    /// Session established and the last probe succeeded
    Healthy,
    /// Session established but the node is not answering
    Broken,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::NotConnected => "not_connected",
            Health::Healthy => "healthy",
            Health::Broken => "broken",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity reported by the node when a session starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_version: String,
    pub core_version: String,
    /// REST session token, used as the bearer credential until teardown
    pub session_id: Option<String>,
}

impl NodeIdentity {
    pub fn new(node_version: impl Into<String>, core_version: impl Into<String>) -> Self {
        Self {
            node_version: node_version.into(),
            core_version: core_version.into(),
            session_id: None,
        }
    }

    /// Attach a session token; empty tokens are ignored
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        self.session_id = (!session_id.is_empty()).then_some(session_id);
        self
    }
}

/// Read handle on the log queue of one session.
///
/// Clones share the same queue. Once the session is torn down and its log
/// streamer has exited, `recv` drains what is left and then returns `None`.
#[derive(Debug, Clone)]
pub struct LogReceiver {
    inner: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl LogReceiver {
    fn new(rx: mpsc::Receiver<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wait for the next log line
    pub async fn recv(&self) -> Option<String> {
        self.inner.lock().await.recv().await
    }

    /// Take a line if one is ready without waiting.
    ///
    /// Returns `None` both when the queue is empty and when another clone is
    /// currently waiting in `recv`; it never competes with a blocked reader.
    pub fn try_recv(&self) -> Option<String> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }
}

/// Queue endpoints handed to the background tasks of one epoch
#[derive(Debug, Clone)]
pub(crate) struct SessionQueues {
    pub epoch: u64,
    pub user_updates: Arc<Mutex<mpsc::Receiver<User>>>,
    pub notifications: Arc<Mutex<mpsc::Receiver<()>>>,
    pub logs: mpsc::Sender<String>,
}

#[derive(Debug)]
struct Queues {
    user_tx: mpsc::Sender<User>,
    user_rx: Arc<Mutex<mpsc::Receiver<User>>>,
    notify_tx: mpsc::Sender<()>,
    notify_rx: Arc<Mutex<mpsc::Receiver<()>>>,
    log_tx: mpsc::Sender<String>,
    log_rx: LogReceiver,
}

impl Queues {
    fn new(config: &QueueConfig) -> Self {
        let (user_tx, user_rx) = mpsc::channel(config.user_capacity.max(1));
        let (notify_tx, notify_rx) = mpsc::channel(config.notify_capacity.max(1));
        let (log_tx, log_rx) = mpsc::channel(config.log_capacity.max(1));
        Self {
            user_tx,
            user_rx: Arc::new(Mutex::new(user_rx)),
            notify_tx,
            notify_rx: Arc::new(Mutex::new(notify_rx)),
            log_tx,
            log_rx: LogReceiver::new(log_rx),
        }
    }
}

#[derive(Debug)]
struct State {
    health: Health,
    identity: NodeIdentity,
    epoch: u64,
    queues: Queues,
}

/// Shared connection state for one node.
///
/// Plain fields sit behind a single read/write lock; the queues carry their
/// own synchronisation and are only handed out as cloned endpoints.
#[derive(Debug)]
pub struct Controller {
    state: RwLock<State>,
    api_key: String,
    extra: Map<String, Value>,
    queue_config: QueueConfig,
}

impl Controller {
    pub fn new(api_key: impl Into<String>, queues: QueueConfig, extra: Map<String, Value>) -> Self {
        Self {
            state: RwLock::new(State {
                health: Health::NotConnected,
                identity: NodeIdentity::default(),
                epoch: 0,
                queues: Queues::new(&queues),
            }),
            api_key: api_key.into(),
            extra,
            queue_config: queues,
        }
    }

    pub async fn health(&self) -> Health {
        self.state.read().await.health
    }

    /// Record a probe outcome or failure signal for the current session.
    ///
    /// Only `Healthy <-> Broken` moves are applied here; the first move into
    /// `Broken` queues exactly one notification. Returns whether the health
    /// changed.
    pub async fn set_health(&self, health: Health) -> bool {
        let mut state = self.state.write().await;
        Self::apply_health(&mut state, health)
    }

    /// Like `set_health`, but ignored when `epoch` is no longer current
    pub(crate) async fn set_health_in(&self, epoch: u64, health: Health) -> bool {
        let mut state = self.state.write().await;
        if state.epoch != epoch {
            debug!(
                epoch,
                current = state.epoch,
                "Ignoring health update from a previous session"
            );
            return false;
        }
        Self::apply_health(&mut state, health)
    }

    fn apply_health(state: &mut State, health: Health) -> bool {
        let current = state.health;
        if current == health {
            return false;
        }
        if current == Health::NotConnected || health == Health::NotConnected {
            debug!(from = %current, to = %health, "Rejected health transition");
            return false;
        }

        if health == Health::Broken {
            // Never block while holding the state lock: one pending
            // notification already forces the synchroniser to restart.
            if state.queues.notify_tx.try_send(()).is_err() {
                debug!("Health notification queue full, dropping notification");
            }
            warn!(epoch = state.epoch, "Node health changed to broken");
        } else {
            info!(epoch = state.epoch, "Node health recovered");
        }

        state.health = health;
        true
    }

    /// Start a new session epoch with the identity the node reported.
    ///
    /// Returns the new epoch number.
    pub async fn connect(&self, identity: NodeIdentity) -> u64 {
        let mut state = self.state.write().await;
        state.epoch += 1;
        state.queues = Queues::new(&self.queue_config);
        info!(
            epoch = state.epoch,
            node_version = %identity.node_version,
            core_version = %identity.core_version,
            "Node connected"
        );
        state.identity = identity;
        state.health = Health::Healthy;
        state.epoch
    }

    /// Tear down the current epoch. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        if state.health != Health::NotConnected {
            info!(epoch = state.epoch, "Node disconnected");
        }
        // Bumping the epoch makes late health updates from old tasks no-ops
        state.epoch += 1;
        state.queues = Queues::new(&self.queue_config);
        state.identity = NodeIdentity::default();
        state.health = Health::NotConnected;
    }

    /// Fails with `NotConnected` unless a session is active
    pub async fn connected(&self) -> Result<()> {
        match self.health().await {
            Health::NotConnected => Err(BridgeError::NotConnected),
            _ => Ok(()),
        }
    }

    /// Queue a user update for the synchroniser.
    ///
    /// Waits while the queue is full. Refused unless the node is healthy.
    pub async fn update_user(&self, user: User) -> Result<()> {
        let tx = {
            let state = self.state.read().await;
            match state.health {
                Health::NotConnected => return Err(BridgeError::NotConnected),
                Health::Broken => return Err(BridgeError::Broken),
                Health::Healthy => state.queues.user_tx.clone(),
            }
        };

        let email = user.email.clone();
        tx.send(user).await.map_err(|_| BridgeError::NotConnected)?;
        debug!(email = %email, "User update queued");
        Ok(())
    }

    /// Queue a removal: the user is sent with no inbounds
    pub async fn remove_user(&self, mut user: User) -> Result<()> {
        user.inbounds.clear();
        self.update_user(user).await
    }

    /// Read handle on the current session's log queue
    pub async fn logs(&self) -> Result<LogReceiver> {
        let state = self.state.read().await;
        match state.health {
            Health::NotConnected => Err(BridgeError::NotConnected),
            _ => Ok(state.queues.log_rx.clone()),
        }
    }

    pub(crate) async fn session_queues(&self) -> SessionQueues {
        let state = self.state.read().await;
        SessionQueues {
            epoch: state.epoch,
            user_updates: Arc::clone(&state.queues.user_rx),
            notifications: Arc::clone(&state.queues.notify_rx),
            logs: state.queues.log_tx.clone(),
        }
    }

    pub async fn identity(&self) -> NodeIdentity {
        self.state.read().await.identity.clone()
    }

    pub async fn node_version(&self) -> String {
        self.state.read().await.identity.node_version.clone()
    }

    pub async fn core_version(&self) -> String {
        self.state.read().await.identity.core_version.clone()
    }

    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Bearer credential: the session token while one is held, else the API key
    pub async fn credential(&self) -> String {
        let state = self.state.read().await;
        state
            .identity
            .session_id
            .clone()
            .unwrap_or_else(|| self.api_key.clone())
    }

    /// Opaque settings supplied at construction
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        Controller::new("key", QueueConfig::default(), Map::new())
    }

    fn user(email: &str) -> User {
        User {
            email: email.to_string(),
            proxies: None,
            inbounds: vec!["inbound".to_string()],
        }
    }

    async fn pending_notifications(c: &Controller) -> usize {
        let queues = c.session_queues().await;
        let mut rx = queues.notifications.lock().await;
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_new_controller_is_not_connected() {
        let c = controller();
        assert_eq!(c.health().await, Health::NotConnected);
        assert!(matches!(c.connected().await, Err(BridgeError::NotConnected)));
        assert_eq!(c.api_key(), "key");
    }

    #[tokio::test]
    async fn test_connect_records_identity() {
        let c = controller();
        c.connect(NodeIdentity::new("1.2.3", "25.1")).await;

        assert_eq!(c.health().await, Health::Healthy);
        assert_eq!(c.node_version().await, "1.2.3");
        assert_eq!(c.core_version().await, "25.1");
        assert!(c.connected().await.is_ok());
    }

    #[tokio::test]
    async fn test_repeated_broken_notifies_once() {
        let c = controller();
        c.connect(NodeIdentity::new("1", "1")).await;

        assert!(c.set_health(Health::Broken).await);
        assert!(!c.set_health(Health::Broken).await);
        assert_eq!(pending_notifications(&c).await, 1);

        assert!(c.set_health(Health::Healthy).await);
        assert!(c.set_health(Health::Broken).await);
        assert_eq!(pending_notifications(&c).await, 1);
    }

    #[tokio::test]
    async fn test_full_notify_queue_never_blocks() {
        let config = QueueConfig {
            notify_capacity: 1,
            ..QueueConfig::default()
        };
        let c = Controller::new("key", config, Map::new());
        c.connect(NodeIdentity::new("1", "1")).await;

        for _ in 0..5 {
            c.set_health(Health::Broken).await;
            c.set_health(Health::Healthy).await;
        }
        assert_eq!(c.health().await, Health::Healthy);
        assert_eq!(pending_notifications(&c).await, 1);
    }

    #[tokio::test]
    async fn test_set_health_cannot_leave_not_connected() {
        let c = controller();
        assert!(!c.set_health(Health::Healthy).await);
        assert!(!c.set_health(Health::Broken).await);
        assert_eq!(c.health().await, Health::NotConnected);

        c.connect(NodeIdentity::new("1", "1")).await;
        assert!(!c.set_health(Health::NotConnected).await);
        assert_eq!(c.health().await, Health::Healthy);
    }

    #[tokio::test]
    async fn test_stale_epoch_health_update_ignored() {
        let c = controller();
        let old = c.connect(NodeIdentity::new("1", "1")).await;
        c.disconnect().await;
        let new = c.connect(NodeIdentity::new("2", "2")).await;
        assert_ne!(old, new);

        assert!(!c.set_health_in(old, Health::Broken).await);
        assert_eq!(c.health().await, Health::Healthy);
        assert!(c.set_health_in(new, Health::Broken).await);
    }

    #[tokio::test]
    async fn test_disconnect_resets_queues() {
        let c = controller();
        c.connect(NodeIdentity::new("1", "1")).await;
        c.update_user(user("a")).await.unwrap();
        let old = c.session_queues().await;

        c.disconnect().await;
        c.connect(NodeIdentity::new("1", "1")).await;

        let fresh = c.session_queues().await;
        assert!(fresh.user_updates.lock().await.try_recv().is_err());
        assert!(!Arc::ptr_eq(&old.user_updates, &fresh.user_updates));
        assert_eq!(old.user_updates.lock().await.try_recv().unwrap().email, "a");
    }

    #[tokio::test]
    async fn test_update_user_refused_when_broken() {
        let c = controller();
        c.connect(NodeIdentity::new("1", "1")).await;
        c.set_health(Health::Broken).await;

        assert!(matches!(c.update_user(user("a")).await, Err(BridgeError::Broken)));
        // Logs stay readable while broken
        assert!(c.logs().await.is_ok());
    }

    #[tokio::test]
    async fn test_user_updates_drain_in_order() {
        let c = controller();
        c.connect(NodeIdentity::new("1", "1")).await;
        for email in ["a", "b", "c"] {
            c.update_user(user(email)).await.unwrap();
        }

        let queues = c.session_queues().await;
        let mut rx = queues.user_updates.lock().await;
        let mut drained = Vec::new();
        while let Ok(u) = rx.try_recv() {
            drained.push(u.email);
        }
        assert_eq!(drained, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_remove_user_clears_inbounds() {
        let c = controller();
        c.connect(NodeIdentity::new("1", "1")).await;
        c.remove_user(user("gone")).await.unwrap();

        let queues = c.session_queues().await;
        let queued = queues.user_updates.lock().await.try_recv().unwrap();
        assert_eq!(queued.email, "gone");
        assert!(queued.inbounds.is_empty());
    }

    #[tokio::test]
    async fn test_credential_prefers_session_token() {
        let c = controller();
        assert_eq!(c.credential().await, "key");

        c.connect(NodeIdentity::new("1", "1").with_session("abc")).await;
        assert_eq!(c.credential().await, "abc");

        c.disconnect().await;
        assert_eq!(c.credential().await, "key");
    }

    #[tokio::test]
    async fn test_empty_session_token_ignored() {
        let identity = NodeIdentity::new("1", "1").with_session("");
        assert!(identity.session_id.is_none());
    }

    #[tokio::test]
    async fn test_log_receiver_delivers_in_order() {
        let c = controller();
        c.connect(NodeIdentity::new("1", "1")).await;
        let queues = c.session_queues().await;
        queues.logs.send("one".to_string()).await.unwrap();
        queues.logs.send("two".to_string()).await.unwrap();

        let logs = c.logs().await.unwrap();
        assert_eq!(logs.recv().await.as_deref(), Some("one"));
        assert_eq!(logs.try_recv().as_deref(), Some("two"));
        assert!(logs.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_refused_updates_are_not_queued() {
        let c = controller();
        let err = c.update_user(user("early")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
        let queues = c.session_queues().await;
        assert!(queues.user_updates.lock().await.try_recv().is_err());

        c.connect(NodeIdentity::new("1", "1")).await;
        c.set_health(Health::Broken).await;
        let err = c.update_user(user("late")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Broken));

        // Same session: the queue the synchroniser reads stays empty
        let queues = c.session_queues().await;
        assert!(queues.user_updates.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_try_recv_yields_to_blocked_reader() {
        let c = controller();
        c.connect(NodeIdentity::new("1", "1")).await;
        let queues = c.session_queues().await;
        let logs = c.logs().await.unwrap();

        let reader = logs.clone();
        let blocked = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;

        // A line is ready, but the waiting reader owns the queue
        queues.logs.try_send("line".to_string()).unwrap();
        assert!(logs.try_recv().is_none());
        assert_eq!(blocked.await.unwrap().as_deref(), Some("line"));
    }
}
