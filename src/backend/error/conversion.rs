/**
 * Error Conversion
 *
 * `IntoResponse` for `BackendError` and the wrong-server signal.
 *
 * # Response Format
 *
 * ```json
 * {
 *   "error": "Error message",
 *   "status": 400
 * }
 * ```
 *
 * A wrong-server redirect answers `421 Misdirected Request` with the
 * `WrongServer` object as the body.
 */

use crate::backend::error::types::BackendError;
use crate::shared::WrongServer;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!("[Http] {} - {}", status, message);
        } else {
            tracing::debug!("[Http] {} - {}", status, message);
        }

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for WrongServer {
    fn into_response(self) -> Response {
        (StatusCode::MISDIRECTED_REQUEST, Json(self)).into_response()
    }
}
