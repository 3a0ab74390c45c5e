/**
 * Read-State Handlers
 *
 * Query surface of the read-state tracker for the API layer.
 *
 * - `GET /channels/{channel_id}/read-state` - the caller's receipt and
 *   unread count
 * - `GET /channels/{channel_id}/receipts?members=<uuid>,<uuid>` - receipts of
 *   several members in one call; without `members`, every channel member
 *
 * Both require channel access for the caller.
 */

use crate::backend::error::BackendError;
use crate::backend::middleware::CallerId;
use crate::backend::server::state::AppState;
use crate::shared::{ChannelId, ReadReceipt, SharedError, UserId};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The caller's read state in one channel
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadStateView {
    pub channel_id: ChannelId,
    pub receipt: Option<ReadReceipt>,
    pub unread_count: usize,
}

pub async fn handle_read_state(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    CallerId(caller): CallerId,
) -> Result<Json<ReadStateView>, BackendError> {
    let channel_id = ChannelId(channel_id);
    state
        .chat
        .access()
        .require_channel_access(caller, channel_id)
        .await?;

    let tracker = &state.tracker;
    let receipt = tracker.get_read_receipt(caller, channel_id).await?;
    let unread_count = tracker.get_unread_count(caller, channel_id).await?;

    Ok(Json(ReadStateView {
        channel_id,
        receipt,
        unread_count,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReceiptsQuery {
    /// Comma-separated user ids
    pub members: Option<String>,
}

fn parse_members(raw: &str) -> Result<Vec<UserId>, SharedError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            Uuid::parse_str(part)
                .map(UserId)
                .map_err(|e| SharedError::validation("members", e.to_string()))
        })
        .collect()
}

pub async fn handle_channel_receipts(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    CallerId(caller): CallerId,
    Query(query): Query<ReceiptsQuery>,
) -> Result<Json<Vec<ReadReceipt>>, BackendError> {
    let channel_id = ChannelId(channel_id);
    state
        .chat
        .access()
        .require_channel_access(caller, channel_id)
        .await?;
    let members = match query.members.as_deref() {
        Some(raw) => parse_members(raw)?,
        None => state.chat.access().channel_members(channel_id).await?,
    };

    let receipts = state
        .tracker
        .get_channel_read_receipts(caller, channel_id, &members)
        .await?;
    Ok(Json(receipts))
}
