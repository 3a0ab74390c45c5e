//! Shared Module
//!
//! Types that cross process boundaries: the message model, the live event
//! envelope, read receipts, the wrong-server signal, and configuration.
//! Everything here is plain data and serializes to the JSON wire format.

/// Identifier newtypes
pub mod ids;

/// Message data structure and ordering keys
pub mod message;

/// Live event envelope and client frames
pub mod event;

/// Read receipts and mirror events
pub mod read_state;

/// Wrong-server signal
pub mod routing;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use ids::{ChannelId, MessageId, ServerId, SessionId, UserId};
pub use message::{Message, OrderingKey};
pub use event::{ClientFrame, ClientRequest, EventType, LiveEnvelope};
pub use read_state::{ReadPosition, ReadReceipt, ReadStateEvent};
pub use routing::WrongServer;
pub use error::SharedError;
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
