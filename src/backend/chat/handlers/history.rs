/**
 * Catch-up Handler
 *
 * `GET /channels/{channel_id}/messages` returns committed messages in
 * ordering-key order. Clients use it to fill gaps after a reconnect.
 *
 * # Query Parameters
 *
 * - `after` - read position (epoch millis); only messages strictly later
 * - `since` - ordering key; only messages with a strictly greater key
 *
 * Without either parameter the whole channel history is returned. `since`
 * wins when both are given.
 */

use crate::backend::chat::service::ChatService;
use crate::backend::error::BackendError;
use crate::backend::middleware::CallerId;
use crate::shared::{ChannelId, Message, OrderingKey, ReadPosition};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub after: Option<i64>,
    pub since: Option<String>,
}

pub async fn handle_catch_up(
    State(chat): State<Arc<ChatService>>,
    Path(channel_id): Path<i64>,
    CallerId(caller): CallerId,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, BackendError> {
    let channel_id = ChannelId(channel_id);
    chat.access().require_channel_access(caller, channel_id).await?;

    let messages = match (query.since, query.after) {
        (Some(raw), _) => {
            let cursor = OrderingKey::parse(&raw)?;
            chat.messages_since(channel_id, Some(&cursor)).await?
        }
        (None, Some(after)) => chat.catch_up(channel_id, ReadPosition(after)).await?,
        (None, None) => chat.messages_since(channel_id, None).await?,
    };

    tracing::debug!(
        "[Chat] Catch-up for {} on channel {}: {} messages",
        caller,
        channel_id,
        messages.len()
    );
    Ok(Json(messages))
}
