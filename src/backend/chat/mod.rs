//! Chat Module
//!
//! The message write path and its storage.
//!
//! # Module Structure
//!
//! ```text
//! chat/
//! ├── mod.rs      - Module exports and documentation
//! ├── store.rs    - MessageStore trait and in-memory store
//! ├── db.rs       - PostgreSQL message store
//! ├── service.rs  - ChatService send pipeline and catch-up queries
//! └── handlers/   - HTTP handlers
//! ```
//!
//! # Write Path
//!
//! router (ownership) → ordering key → store commit → bus publish → fan-out.
//! Durability precedes visibility: nothing is published before the commit
//! returns.

/// Message store trait and in-memory implementation
pub mod store;

/// PostgreSQL message store
pub mod db;

/// Send pipeline
pub mod service;

/// HTTP handlers
pub mod handlers;

pub use db::PgMessageStore;
pub use service::{ChatDeps, ChatService};
pub use store::{InMemoryMessageStore, MessageStore, UnreadMarker};
