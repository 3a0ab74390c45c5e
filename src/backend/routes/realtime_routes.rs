/**
 * Real-time Route Handlers
 *
 * # Routes
 *
 * - `GET /channels/{channel_id}/live` - SSE stream of live envelopes
 * - `POST /realtime/frames` - READ / RESEND_REQUEST frames from clients
 */

use crate::backend::realtime::{handle_client_frame, handle_live_subscription};
use crate::backend::server::state::AppState;
use axum::Router;

pub fn configure_realtime_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(
            "/channels/{channel_id}/live",
            axum::routing::get(handle_live_subscription),
        )
        .route(
            "/realtime/frames",
            axum::routing::post(handle_client_frame),
        )
}
