//! Controller state machine through the public API

use serde_json::{json, Map};
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use node_bridge::{profile, BridgeError, Controller, Health, NodeIdentity, QueueConfig};

fn controller() -> Controller {
    Controller::new("api-key", QueueConfig::default(), Map::new())
}

fn user(email: &str) -> node_bridge::User {
    profile::user(
        email,
        profile::proxies(None, None, Some(profile::trojan("secret")), None),
        vec!["trojan-in".to_string()],
    )
}

#[tokio::test]
async fn test_health_moves_through_valid_states_only() {
    let c = controller();
    let mut seen = vec![c.health().await];

    c.connect(NodeIdentity::new("1.2.3", "25.1")).await;
    seen.push(c.health().await);
    c.set_health(Health::Broken).await;
    seen.push(c.health().await);
    c.set_health(Health::Healthy).await;
    seen.push(c.health().await);
    c.disconnect().await;
    seen.push(c.health().await);

    assert_eq!(
        seen,
        [
            Health::NotConnected,
            Health::Healthy,
            Health::Broken,
            Health::Healthy,
            Health::NotConnected
        ]
    );
}

#[tokio::test]
async fn test_identity_reflects_last_connect() {
    let c = controller();
    c.connect(NodeIdentity::new("1.2.3", "25.1")).await;

    let identity = c.identity().await;
    assert_eq!(identity.node_version, "1.2.3");
    assert_eq!(identity.core_version, "25.1");

    c.connect(NodeIdentity::new("2.0.0", "26.0")).await;
    assert_eq!(c.node_version().await, "2.0.0");

    c.disconnect().await;
    assert_eq!(c.identity().await, NodeIdentity::default());
}

#[tokio::test]
async fn test_double_disconnect_is_harmless() {
    let c = controller();
    c.connect(NodeIdentity::new("1", "1")).await;

    c.disconnect().await;
    assert_eq!(c.health().await, Health::NotConnected);
    c.disconnect().await;
    assert_eq!(c.health().await, Health::NotConnected);
}

#[tokio::test]
async fn test_update_user_requires_connection() {
    let c = controller();
    let err = c.update_user(user("a")).await.unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected));
    assert!(err.is_connection_state());
}

#[tokio::test]
async fn test_broken_node_refuses_updates() {
    let c = controller();
    c.connect(NodeIdentity::new("1", "1")).await;
    c.set_health(Health::Broken).await;

    let err = c.remove_user(user("a")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Broken));
    assert!(err.is_connection_state());
}

#[tokio::test]
async fn test_update_user_blocks_when_queue_full() {
    let config = QueueConfig {
        user_capacity: 1,
        ..QueueConfig::default()
    };
    let c = Controller::new("api-key", config, Map::new());
    c.connect(NodeIdentity::new("1", "1")).await;

    assert_ok!(c.update_user(user("a")).await);
    let blocked = tokio::time::timeout(Duration::from_millis(50), c.update_user(user("b"))).await;
    assert_err!(blocked, "second update should wait for queue space");
}

#[tokio::test]
async fn test_logs_require_connection() {
    let c = controller();
    assert_err!(c.logs().await);
    assert_err!(c.connected().await);

    c.connect(NodeIdentity::new("1", "1")).await;
    assert_ok!(c.logs().await);
    assert_ok!(c.connected().await);
}

#[tokio::test]
async fn test_extra_settings_are_kept() {
    let mut extra = Map::new();
    extra.insert("region".to_string(), json!("eu-west"));
    let c = Controller::new("api-key", QueueConfig::default(), extra);

    assert_eq!(c.extra()["region"], "eu-west");
    assert_eq!(c.api_key(), "api-key");
}
