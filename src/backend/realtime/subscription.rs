/**
 * Live Subscription Handler
 *
 * `GET /channels/{channel_id}/live` opens a Server-Sent Events stream of
 * `LiveEnvelope`s for one channel.
 *
 * # Reconnection
 *
 * A client that was disconnected passes the last position it saw as
 * `?after=<millis>`. The session is registered with the fan-out first and
 * the gap is then filled from the message store, so nothing published in
 * between is lost. An event can arrive twice across that seam; clients
 * de-duplicate on `messageId`.
 *
 * # Event Format
 *
 * ```http
 * event: message
 * id: 1000.000
 * data: {"type":"MESSAGE","channelId":7,...}
 *
 * event: read
 * data: {"type":"READ","channelId":7,"senderId":"...","timestamp":1000}
 * ```
 *
 * Keep-alive comments are injected by axum while the channel is quiet.
 */

use crate::backend::error::BackendError;
use crate::backend::middleware::CallerId;
use crate::backend::realtime::fanout::LiveSession;
use crate::backend::server::state::AppState;
use crate::shared::{ChannelId, EventType, LiveEnvelope, ReadPosition};
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use std::collections::VecDeque;

#[derive(Debug, Default, Deserialize)]
pub struct LiveQuery {
    /// Last position the client saw (epoch millis)
    pub after: Option<i64>,
}

fn event_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Message => "message",
        EventType::Read => "read",
        EventType::ResendRequest => "resend_request",
    }
}

/// Render one envelope as an SSE event; `None` when it cannot be encoded
pub fn to_sse_event(envelope: &LiveEnvelope) -> Option<Event> {
    let data = match serde_json::to_string(envelope) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("[Realtime] Failed to serialize envelope: {:?}", e);
            return None;
        }
    };
    let event = Event::default().event(event_name(envelope.event_type)).data(data);
    Some(match &envelope.ordering_key {
        Some(key) => event.id(key.as_str()),
        None => event,
    })
}

pub async fn handle_live_subscription(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    CallerId(caller): CallerId,
    Query(query): Query<LiveQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, BackendError> {
    let channel_id = ChannelId(channel_id);
    state
        .chat
        .access()
        .require_channel_access(caller, channel_id)
        .await?;

    let session = state.fanout.connect(channel_id, caller).await?;

    let backlog: VecDeque<LiveEnvelope> = match query.after {
        Some(after) => state
            .chat
            .catch_up(channel_id, ReadPosition(after))
            .await?
            .iter()
            .map(LiveEnvelope::message)
            .collect(),
        None => VecDeque::new(),
    };

    tracing::info!(
        "[Realtime] Live stream for {} on channel {} opened with {} backlog events",
        caller,
        channel_id,
        backlog.len()
    );

    let stream = stream::unfold(
        (backlog, session),
        |(mut backlog, mut session): (VecDeque<LiveEnvelope>, LiveSession)| async move {
            loop {
                let envelope = match backlog.pop_front() {
                    Some(envelope) => envelope,
                    None => session.recv().await?,
                };
                if let Some(event) = to_sse_event(&envelope) {
                    return Some((Ok(event), (backlog, session)));
                }
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
