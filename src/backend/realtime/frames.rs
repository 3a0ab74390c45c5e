/**
 * Client Frame Handler
 *
 * `POST /realtime/frames` accepts frames a connected client sends back
 * over its live connection:
 *
 * - `READ` - mark the channel read up to `timestamp`
 * - `RESEND_REQUEST` - push every message after `timestamp` to the caller's
 *   live sessions on that channel
 *
 * Malformed or incomplete frames are logged and dropped. The response is
 * `202 Accepted` either way, so a bad frame never turns into an error other
 * users could observe.
 *
 * # Example Request
 *
 * ```http
 * POST /realtime/frames HTTP/1.1
 * X-User-Id: 5f0c...
 *
 * {"type":"READ","channelId":7,"timestamp":1000}
 * ```
 */

use crate::backend::error::BackendError;
use crate::backend::middleware::CallerId;
use crate::backend::server::state::AppState;
use crate::shared::{ClientFrame, ClientRequest, LiveEnvelope};
use axum::{extract::State, http::StatusCode};

pub async fn handle_client_frame(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    body: String,
) -> Result<StatusCode, BackendError> {
    let frame: ClientFrame = match serde_json::from_str(&body) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("[Realtime] Dropping unparseable frame from {}: {}", caller, e);
            return Ok(StatusCode::ACCEPTED);
        }
    };
    let request = match frame.into_request() {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("[Realtime] Dropping incomplete frame from {}: {}", caller, e);
            return Ok(StatusCode::ACCEPTED);
        }
    };

    match request {
        ClientRequest::Read {
            channel_id,
            position,
        } => {
            state
                .chat
                .access()
                .require_channel_access(caller, channel_id)
                .await?;
            state.tracker.mark_read(caller, channel_id, position).await?;
        }
        ClientRequest::Resend { channel_id, after } => {
            state
                .chat
                .access()
                .require_channel_access(caller, channel_id)
                .await?;
            let envelopes: Vec<LiveEnvelope> = state
                .chat
                .catch_up(channel_id, after)
                .await?
                .iter()
                .map(LiveEnvelope::message)
                .collect();
            let count = envelopes.len();
            let sessions = state.fanout.resend_to_user(channel_id, caller, envelopes);
            tracing::info!(
                "[Realtime] Resending {} messages after {} on channel {} to {} sessions of {}",
                count,
                after,
                channel_id,
                sessions,
                caller
            );
        }
    }

    Ok(StatusCode::ACCEPTED)
}
