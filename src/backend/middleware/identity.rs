/**
 * Caller Identity
 *
 * Authentication happens in front of the chat core. The authenticated user
 * id arrives in the `x-user-id` header and is exposed to handlers through
 * the `CallerId` extractor.
 */

use crate::backend::error::BackendError;
use crate::shared::UserId;
use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller of the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub UserId);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = BackendError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                tracing::warn!("[Http] Missing {} header", USER_ID_HEADER);
                BackendError::handler(StatusCode::UNAUTHORIZED, "missing caller identity")
            })?;

        let id = Uuid::parse_str(raw.trim()).map_err(|e| {
            tracing::warn!("[Http] Invalid {} header: {}", USER_ID_HEADER, e);
            BackendError::handler(StatusCode::UNAUTHORIZED, "invalid caller identity")
        })?;

        Ok(CallerId(UserId(id)))
    }
}
