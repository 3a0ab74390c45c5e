//! Cluster scenarios: two or more in-memory nodes sharing one bus

mod common;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use common::{body_json, node_on_bus, request, shared_cluster};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use xfchat::backend::error::BusError;
use xfchat::backend::realtime::{BroadcastBus, EnvelopeStream, LocalBus};
use xfchat::shared::{ChannelId, EventType, LiveEnvelope, ReadPosition, UserId};

struct DownBus;

#[async_trait]
impl BroadcastBus for DownBus {
    async fn publish(&self, _topic: ChannelId, _envelope: &LiveEnvelope) -> Result<(), BusError> {
        Err(BusError::Transport("bus offline".to_string()))
    }

    async fn subscribe(&self, _topic: ChannelId) -> Result<EnvelopeStream, BusError> {
        Err(BusError::Transport("bus offline".to_string()))
    }

    fn bus_name(&self) -> &'static str {
        "down"
    }
}

#[tokio::test]
async fn test_send_is_redirected_then_delivered_across_servers() {
    let bus: Arc<dyn BroadcastBus> = Arc::new(LocalBus::new());
    let server1 = node_on_bus(1, 5, bus.clone());
    let server2 = node_on_bus(2, 5, bus.clone());
    let alice = UserId::new();
    let bob = UserId::new();

    // bob is connected to server 1, which does not own channel 7
    let mut bob_live = server1
        .state
        .fanout
        .connect(ChannelId(7), bob)
        .await
        .unwrap();

    let response = server1
        .app
        .clone()
        .oneshot(request(
            Method::PUT,
            "/channels/7/messages",
            Some(alice),
            Some(json!({ "content": "hello" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({ "channelId": 7, "expectedServerId": 2, "actualServerId": 1 })
    );
    assert_eq!(server1.store.len(ChannelId(7)).await, 0);

    let response = server2
        .app
        .clone()
        .oneshot(request(
            Method::PUT,
            "/channels/7/messages",
            Some(alice),
            Some(json!({ "content": "hello" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let message = body_json(response).await;
    assert_eq!(message["orderingKey"], "1000.000");
    assert_eq!(message["content"], "hello");
    assert_eq!(server2.store.len(ChannelId(7)).await, 1);

    let envelope = tokio::time::timeout(Duration::from_secs(2), bob_live.recv())
        .await
        .expect("live delivery")
        .expect("session open");
    assert_eq!(envelope.event_type, EventType::Message);
    assert_eq!(envelope.sender_id, Some(alice));
    assert_eq!(envelope.content.as_deref(), Some("hello"));
    assert_eq!(envelope.ordering_key.map(String::from), Some("1000.000".to_string()));

    server1.tasks.shutdown().await;
    server2.tasks.shutdown().await;
}

#[tokio::test]
async fn test_every_local_session_receives_the_message() {
    let bus: Arc<dyn BroadcastBus> = Arc::new(LocalBus::new());
    let owner = node_on_bus(0, 1, bus.clone());
    let sender = UserId::new();

    let mut first = owner.state.fanout.connect(ChannelId(3), UserId::new()).await.unwrap();
    let mut second = owner.state.fanout.connect(ChannelId(3), UserId::new()).await.unwrap();
    let mut elsewhere = owner.state.fanout.connect(ChannelId(4), UserId::new()).await.unwrap();

    let response = owner
        .app
        .clone()
        .oneshot(request(
            Method::PUT,
            "/channels/3/messages",
            Some(sender),
            Some(json!({ "content": "to everyone" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    for session in [&mut first, &mut second] {
        let envelope = tokio::time::timeout(Duration::from_secs(2), session.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.content.as_deref(), Some("to everyone"));
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(100), elsewhere.recv())
            .await
            .is_err()
    );

    owner.tasks.shutdown().await;
}

#[tokio::test]
async fn test_read_receipt_reaches_other_servers() {
    let bus: Arc<dyn BroadcastBus> = Arc::new(LocalBus::new());
    let server0 = node_on_bus(0, 2, bus.clone());
    let server1 = node_on_bus(1, 2, bus.clone());
    let reader = UserId::new();

    let mut watcher = server0.state.fanout.connect(ChannelId(9), UserId::new()).await.unwrap();

    server1
        .state
        .tracker
        .mark_read(reader, ChannelId(9), xfchat::shared::ReadPosition(4200))
        .await
        .unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(2), watcher.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.event_type, EventType::Read);
    assert_eq!(envelope.sender_id, Some(reader));
    assert_eq!(envelope.timestamp, 4200);

    server0.tasks.shutdown().await;
    server1.tasks.shutdown().await;
}

#[tokio::test]
async fn test_bus_outage_does_not_fail_the_send() {
    let node = node_on_bus(0, 1, Arc::new(DownBus));

    let response = node
        .app
        .clone()
        .oneshot(request(
            Method::PUT,
            "/channels/1/messages",
            Some(UserId::new()),
            Some(json!({ "content": "still stored" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(node.store.len(ChannelId(1)).await, 1);

    // catch-up recovers what live delivery could not
    let response = node
        .app
        .clone()
        .oneshot(request(Method::GET, "/channels/1/messages?after=0", Some(UserId::new()), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));

    node.tasks.shutdown().await;
}

#[tokio::test]
async fn test_keys_follow_the_clock() {
    let node = node_on_bus(0, 1, Arc::new(LocalBus::new()));
    let user = UserId::new();
    let mut keys = Vec::new();

    for millis in [1000, 1000, 1001] {
        node.clock.set(millis);
        let response = node
            .app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/channels/2/messages",
                Some(user),
                Some(json!({ "content": "tick" })),
            ))
            .await
            .unwrap();
        keys.push(body_json(response).await["orderingKey"].as_str().unwrap().to_string());
    }

    assert_eq!(keys, vec!["1000.000", "1000.001", "1001.000"]);
    node.tasks.shutdown().await;
}

#[tokio::test]
async fn test_read_state_caches_follow_other_servers() {
    let nodes = shared_cluster(2);
    let (a, b) = (&nodes[0], &nodes[1]);
    let (bob, alice) = (UserId::new(), UserId::new());

    // Channel 4 is owned by server 0, channel 5 by server 1.
    a.state.tracker.mark_read(bob, ChannelId(4), ReadPosition(1000)).await.unwrap();
    let mut cached = None;
    for _ in 0..50 {
        cached = b.state.tracker.get_read_position(bob, ChannelId(4)).await.unwrap();
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cached, Some(ReadPosition(1000)));

    a.state.tracker.mark_read(bob, ChannelId(4), ReadPosition(5000)).await.unwrap();
    for _ in 0..50 {
        cached = b.state.tracker.get_read_position(bob, ChannelId(4)).await.unwrap();
        if cached == Some(ReadPosition(5000)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cached, Some(ReadPosition(5000)));

    // Bob's unread count lives on server 0; the send lands on server 1.
    assert_eq!(a.state.tracker.get_unread_count(bob, ChannelId(5)).await.unwrap(), 0);
    let response = b
        .app
        .clone()
        .oneshot(request(
            Method::PUT,
            "/channels/5/messages",
            Some(alice),
            Some(json!({ "content": "hello from server 1" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let mut unread = 0;
    for _ in 0..50 {
        unread = a.state.tracker.get_unread_count(bob, ChannelId(5)).await.unwrap();
        if unread == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(unread, 1);
    assert_eq!(b.state.tracker.get_unread_count(bob, ChannelId(5)).await.unwrap(), 1);

    for node in nodes {
        node.tasks.shutdown().await;
    }
}
