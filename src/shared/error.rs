//! Shared Error Types
//!
//! Errors raised while decoding or validating wire types (messages, ordering
//! keys, client frames). These never carry server-side context, so they can be
//! returned to clients as-is.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// A field is missing or holds an invalid value
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// Wire name of the offending field
        field: String,
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
