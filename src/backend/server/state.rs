/**
 * Application State Management
 *
 * `AppState` is the central state container handed to every handler. It
 * holds shared handles only (everything is `Arc` or cheaply clonable), so
 * cloning it per request is cheap.
 *
 * # State Extraction
 *
 * The `FromRef` implementations allow handlers to extract the part of the
 * state they need, e.g. `State<Arc<ChatService>>`, without taking the whole
 * `AppState`.
 */

use crate::backend::chat::ChatService;
use crate::backend::read_state::ReadStateTracker;
use crate::backend::realtime::FanoutHub;
use crate::backend::retry::RetryBuffer;
use crate::shared::AppConfig;
use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub chat: Arc<ChatService>,
    pub tracker: Arc<ReadStateTracker>,
    pub fanout: FanoutHub,
    pub retry: Arc<RetryBuffer>,
    /// Database connection pool (None when running on in-memory stores)
    pub db_pool: Option<PgPool>,
}

impl FromRef<AppState> for Arc<ChatService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.chat.clone()
    }
}

impl FromRef<AppState> for Arc<ReadStateTracker> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.tracker.clone()
    }
}

impl FromRef<AppState> for FanoutHub {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.fanout.clone()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}
