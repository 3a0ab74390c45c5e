/**
 * Backend Error Types
 *
 * This module defines the error types raised by the chat core and the
 * umbrella `BackendError` returned from HTTP handlers.
 *
 * # Error Categories
 *
 * ## Fatal
 *
 * - `OrderingError` - the clock cannot produce a timestamp; surfaced, no retry
 *
 * ## Degrade gracefully
 *
 * - `BusError` - live delivery skipped, durable state unaffected
 *
 * ## Buffered retry
 *
 * - `MirrorError` - read-state mirror write failed; event goes to the retry buffer
 *
 * ## Control flow
 *
 * Wrong-server routing is not an error. `SendOutcome::Redirect` carries it.
 */

use crate::shared::{ChannelId, Message, SharedError, UserId, WrongServer};
use axum::http::StatusCode;
use thiserror::Error;

/// Ordering-key generation failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderingError {
    #[error("system clock unavailable: {0}")]
    ClockUnavailable(String),
}

/// Message store failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// `(channel_id, ordering_key)` already exists
    #[error("duplicate ordering key {ordering_key} in channel {channel_id}")]
    DuplicateKey {
        channel_id: ChannelId,
        ordering_key: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Broadcast bus failure
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("bus transport error: {0}")]
    Transport(String),

    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("payload of {0} bytes exceeds the notify limit")]
    PayloadTooLarge(usize),
}

/// Durable read-state mirror failure
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("mirror unavailable: {0}")]
    Unavailable(String),
}

/// Permission collaborator denial
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("user {user_id} has no access to channel {channel_id}")]
    Denied {
        user_id: UserId,
        channel_id: ChannelId,
    },

    #[error("access check unavailable: {0}")]
    Unavailable(String),
}

/// Result of submitting a message
///
/// Redirects are ordinary outcomes, not errors, so callers branch on the
/// variant instead of inspecting error types.
#[derive(Debug)]
pub enum SendOutcome {
    /// Committed (and announced on the bus when it was reachable)
    Delivered(Message),
    /// This server does not own the channel
    Redirect(WrongServer),
    /// Nothing was committed
    Failed(BackendError),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// Backend-specific error types
///
/// This enum represents the errors that reach handlers. Each variant maps
/// to an HTTP status code.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Handler error (e.g., missing headers, invalid request)
    #[error("Handler error: {message}")]
    HandlerError {
        /// HTTP status code for this error
        status: StatusCode,
        /// Human-readable error message
        message: String,
    },

    /// State management error (e.g., poisoned lock)
    #[error("State error: {message}")]
    StateError {
        /// Human-readable error message
        message: String,
    },

    #[error(transparent)]
    Ordering(#[from] OrderingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Access(#[from] AccessError),

    /// Shared error (validation of wire types)
    #[error(transparent)]
    SharedError(#[from] SharedError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl BackendError {
    /// Create a new handler error with a status code
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::HandlerError {
            status,
            message: message.into(),
        }
    }

    /// Create a new state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::StateError {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    ///
    /// - `HandlerError` - Uses the status code from the error
    /// - `Access::Denied` - 403 Forbidden
    /// - `SharedError::ValidationError` - 400 Bad Request
    /// - `Store` / `Mirror` / `Bus` failures - 503 Service Unavailable
    /// - everything else - 500 Internal Server Error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HandlerError { status, .. } => *status,
            Self::StateError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ordering(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(StoreError::DuplicateKey { .. }) => StatusCode::CONFLICT,
            Self::Store(_) | Self::Mirror(_) | Self::Bus(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Access(AccessError::Denied { .. }) => StatusCode::FORBIDDEN,
            Self::Access(AccessError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SharedError(err) => match err {
                SharedError::SerializationError { .. } => StatusCode::BAD_REQUEST,
                SharedError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            },
            Self::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::HandlerError { message, .. } => message.clone(),
            Self::StateError { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
