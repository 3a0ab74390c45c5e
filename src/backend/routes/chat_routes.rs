/**
 * Chat Route Handlers
 *
 * # Routes
 *
 * - `PUT /channels/{channel_id}/messages` - send a message
 * - `GET /channels/{channel_id}/messages` - catch up (`?after=` or `?since=`)
 * - `GET /channels/{channel_id}/read-state` - caller's receipt and unread count
 * - `GET /channels/{channel_id}/receipts` - receipts of the channel's members
 */

use crate::backend::chat::handlers::{
    handle_catch_up, handle_channel_receipts, handle_read_state, handle_send_message,
};
use crate::backend::server::state::AppState;
use axum::Router;

/// Add the chat routes to `router`
pub fn configure_chat_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(
            "/channels/{channel_id}/messages",
            axum::routing::put(handle_send_message).get(handle_catch_up),
        )
        .route(
            "/channels/{channel_id}/read-state",
            axum::routing::get(handle_read_state),
        )
        .route(
            "/channels/{channel_id}/receipts",
            axum::routing::get(handle_channel_receipts),
        )
}
