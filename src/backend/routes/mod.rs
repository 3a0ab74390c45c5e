//! Route Configuration Module
//!
//! This module configures all HTTP routes for the backend server.
//!
//! # Module Structure
//!
//! ```text
//! routes/
//! ├── mod.rs              - Module exports and documentation
//! ├── router.rs           - Main router, health check, fallback
//! ├── chat_routes.rs      - Messages and read state
//! └── realtime_routes.rs  - Live stream and client frames
//! ```
//!
//! # Identity
//!
//! Every chat and real-time route expects the caller in the `X-User-Id`
//! header; requests without it get `401`.
//!
//! # Wrong Server
//!
//! A send for a channel this process does not own is answered with
//! `421 Misdirected Request` and a body naming the owning server.

/// Main router creation
pub mod router;

/// Chat routes
pub mod chat_routes;

/// Real-time routes
pub mod realtime_routes;

pub use router::create_router;
