//! Backend Module
//!
//! Server-side core of the xfchat multi-user chat backend.
//!
//! # Overview
//!
//! A message submitted to a channel is accepted only by the server process
//! that owns the channel. The owner stamps it with an ordering key, commits
//! it to the message store and then publishes it on the broadcast bus. Every
//! process forwards bus events to its own live connections. Read positions
//! live in memory, are mirrored to durable storage in the background, and
//! mirror writes that fail wait in a bounded retry buffer.
//!
//! This module is only compiled when the `ssr` feature is enabled.
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs          - Module exports and documentation
//! ├── server/         - Configuration, state, initialization
//! ├── routes/         - Route configuration
//! ├── routing/        - Channel affinity (which server owns a channel)
//! ├── ordering/       - Ordering key generator
//! ├── chat/           - Message store, send pipeline, HTTP handlers
//! ├── realtime/       - Broadcast bus, connection fan-out, SSE
//! ├── read_state/     - Read-state tracker and durable mirror
//! ├── retry/          - Durable retry buffer
//! ├── access/         - Channel access checks
//! ├── middleware/     - Caller identity extraction
//! └── error/          - Error types
//! ```
//!
//! # Send Pipeline
//!
//! ```text
//! route check -> ordering key -> store commit -> bus publish -> fan-out
//!      |                              |               |
//!  WrongServer                    Failed(e)     skipped on timeout
//! ```
//!
//! A message is never published before it is committed, and a failed or
//! slow publish never fails the send.
//!
//! # Thread Safety
//!
//! Shared state sits behind `Arc` with `std::sync::Mutex` for short critical
//! sections; no lock guard is held across an `.await`.

/// Server setup and configuration
#[cfg(feature = "ssr")]
pub mod server;

/// Route configuration
#[cfg(feature = "ssr")]
pub mod routes;

/// Channel affinity router
#[cfg(feature = "ssr")]
pub mod routing;

/// Ordering key generator
#[cfg(feature = "ssr")]
pub mod ordering;

/// Message store and send pipeline
#[cfg(feature = "ssr")]
pub mod chat;

/// Real-time delivery
#[cfg(feature = "ssr")]
pub mod realtime;

/// Read-state tracking
#[cfg(feature = "ssr")]
pub mod read_state;

/// Durable retry buffer
#[cfg(feature = "ssr")]
pub mod retry;

/// Channel access checks
#[cfg(feature = "ssr")]
pub mod access;

/// Middleware for request processing
#[cfg(feature = "ssr")]
pub mod middleware;

/// Backend error types
#[cfg(feature = "ssr")]
pub mod error;

/// Re-export commonly used types
#[cfg(feature = "ssr")]
pub use server::create_app;
#[cfg(feature = "ssr")]
pub use chat::ChatService;
#[cfg(feature = "ssr")]
pub use read_state::ReadStateTracker;
#[cfg(feature = "ssr")]
pub use realtime::{BroadcastBus, FanoutHub};
#[cfg(feature = "ssr")]
pub use error::BackendError;
