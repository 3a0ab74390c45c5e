//! Common test utilities and helpers
//!
//! - in-memory server nodes that can share one bus (or all of their storage)
//! - a controllable clock
//! - request builders and response decoding for `tower::ServiceExt::oneshot`
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use xfchat::backend::access::StaticChannelAccess;
use xfchat::backend::chat::InMemoryMessageStore;
use xfchat::backend::error::OrderingError;
use xfchat::backend::ordering::Clock;
use xfchat::backend::read_state::InMemoryReadStateMirror;
use xfchat::backend::realtime::{BroadcastBus, LocalBus};
use xfchat::backend::routes::create_router;
use xfchat::backend::server::{build_state, AppState, BackgroundTasks, Components};
use xfchat::backend::middleware::USER_ID_HEADER;
use xfchat::shared::{AppConfig, UserId};

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn at(millis: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(millis)))
    }

    pub fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Result<i64, OrderingError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// One in-memory server process
pub struct TestNode {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<InMemoryMessageStore>,
    pub mirror: Arc<InMemoryReadStateMirror>,
    pub access: Arc<StaticChannelAccess>,
    pub clock: Arc<ManualClock>,
    pub tasks: BackgroundTasks,
}

pub fn test_config(server_id: u32, server_count: u32) -> AppConfig {
    AppConfig::builder()
        .server_id(server_id)
        .server_count(server_count)
        .build()
        .expect("valid test config")
}

/// Start a node on `bus`; nodes sharing a bus see each other's events
pub fn node_on_bus(server_id: u32, server_count: u32, bus: Arc<dyn BroadcastBus>) -> TestNode {
    let store = Arc::new(InMemoryMessageStore::new());
    let mirror = Arc::new(InMemoryReadStateMirror::new());
    let access = Arc::new(StaticChannelAccess::open());
    let clock = ManualClock::at(1000);

    let components = Components {
        store: store.clone(),
        mirror: mirror.clone(),
        bus,
        access: access.clone(),
        clock: clock.clone(),
    };
    let (state, tasks) = build_state(test_config(server_id, server_count), components, None);
    let app = create_router(state.clone());

    TestNode {
        app,
        state,
        store,
        mirror,
        access,
        clock,
        tasks,
    }
}

/// Nodes backed by one bus, message store, mirror and membership table,
/// as servers sharing a database would be
pub fn shared_cluster(server_count: u32) -> Vec<TestNode> {
    let bus: Arc<dyn BroadcastBus> = Arc::new(LocalBus::new());
    let store = Arc::new(InMemoryMessageStore::new());
    let mirror = Arc::new(InMemoryReadStateMirror::new());
    let access = Arc::new(StaticChannelAccess::open());
    let clock = ManualClock::at(1000);

    (0..server_count)
        .map(|server_id| {
            let components = Components {
                store: store.clone(),
                mirror: mirror.clone(),
                bus: bus.clone(),
                access: access.clone(),
                clock: clock.clone(),
            };
            let (state, tasks) = build_state(test_config(server_id, server_count), components, None);
            TestNode {
                app: create_router(state.clone()),
                state,
                store: store.clone(),
                mirror: mirror.clone(),
                access: access.clone(),
                clock: clock.clone(),
                tasks,
            }
        })
        .collect()
}

/// Single-node cluster with its own bus
pub fn single_node() -> TestNode {
    node_on_bus(0, 1, Arc::new(LocalBus::new()))
}

pub fn request(method: Method, uri: &str, caller: Option<UserId>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header(USER_ID_HEADER, caller.to_string());
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("valid request")
}

pub fn raw_request(method: Method, uri: &str, caller: UserId, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, caller.to_string())
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("json body")
}
