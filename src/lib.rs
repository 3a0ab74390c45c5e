//! xfchat - Multi-user Chat Backend Core
//!
//! Channel-based chat with strictly ordered message history, live delivery
//! across a cluster of server processes, and per-user read positions.
//!
//! # Module Structure
//!
//! - **`shared`** - Wire types: messages and ordering keys, live envelopes,
//!   client frames, read receipts, the wrong-server signal, configuration
//!
//! - **`backend`** - Server-side code (only compiled with `ssr` feature)
//!   - Channel affinity routing and ordering key generation
//!   - Message store with PostgreSQL and in-memory implementations
//!   - Broadcast bus (`pg_notify` or in-process) and connection fan-out
//!   - Read-state tracker, write-behind mirror and retry buffer
//!   - Axum HTTP routes with SSE live streams
//!
//! # Feature Flags
//!
//! - **`ssr`** (default) - enables the backend and its server dependencies
//!
//! # Usage
//!
//! ```rust,no_run
//! use xfchat::backend::server::{create_app, load_config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config()?;
//! let (app, tasks) = create_app(config).await;
//! // serve `app`, then:
//! tasks.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
#[cfg(feature = "ssr")]
pub mod backend;
