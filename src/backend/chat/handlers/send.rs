/**
 * Send Handler
 *
 * `PUT /channels/{channel_id}/messages` submits a message to the channel.
 *
 * # Responses
 *
 * - `201 Created` with the committed `Message`
 * - `421 Misdirected Request` with a `WrongServer` body when another server
 *   owns the channel; the client reconnects to `expectedServerId` and resends
 * - `400` empty or oversized content, `403` no channel access,
 *   `409` ordering key collision, `503` store unavailable
 *
 * # Example Request
 *
 * ```http
 * PUT /channels/7/messages HTTP/1.1
 * X-User-Id: 5f0c...
 * Content-Type: application/json
 *
 * {"content":"Hello"}
 * ```
 */

use crate::backend::chat::service::ChatService;
use crate::backend::error::SendOutcome;
use crate::backend::middleware::CallerId;
use crate::shared::ChannelId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::sync::Arc;

/// Body of a send request
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

pub async fn handle_send_message(
    State(chat): State<Arc<ChatService>>,
    Path(channel_id): Path<i64>,
    CallerId(sender): CallerId,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    let channel_id = ChannelId(channel_id);
    match chat.send(channel_id, sender, &request.content).await {
        SendOutcome::Delivered(message) => {
            tracing::info!(
                "[Chat] {} sent {} to channel {}",
                sender,
                message.ordering_key,
                channel_id
            );
            (StatusCode::CREATED, Json(message)).into_response()
        }
        SendOutcome::Redirect(wrong_server) => wrong_server.into_response(),
        SendOutcome::Failed(error) => error.into_response(),
    }
}
