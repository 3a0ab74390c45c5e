/**
 * Router Configuration
 *
 * Combines all route configurations into a single Axum router.
 *
 * # Route Order
 *
 * 1. Chat routes (send, catch-up, read state)
 * 2. Real-time routes (live stream, client frames)
 * 3. Health check
 * 4. Fallback handler (JSON 404)
 */

use crate::backend::error::BackendError;
use crate::backend::routes::chat_routes::configure_chat_routes;
use crate::backend::routes::realtime_routes::configure_realtime_routes;
use crate::backend::server::state::AppState;
use axum::{extract::State, http::StatusCode, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub server_id: u32,
    pub server_count: u32,
    pub database: bool,
    pub retry_buffered: usize,
    pub retry_dropped: u64,
}

pub async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    let router = state.chat.router();
    Json(HealthReport {
        status: "ok",
        server_id: router.local_server().0,
        server_count: router.server_count(),
        database: state.db_pool.is_some(),
        retry_buffered: state.retry.len(),
        retry_dropped: state.retry.dropped(),
    })
}

async fn handle_not_found() -> BackendError {
    BackendError::handler(StatusCode::NOT_FOUND, "Not found")
}

/// Create the Axum router with all routes configured
pub fn create_router(app_state: AppState) -> Router<()> {
    let router = Router::new();
    let router = configure_chat_routes(router);
    let router = configure_realtime_routes(router);

    let router = router
        .route("/health", axum::routing::get(handle_health))
        .fallback(handle_not_found);

    router.with_state(app_state)
}
