//! Chat Handlers Module
//!
//! Axum handlers for the chat endpoints. They only translate HTTP to calls
//! on `ChatService` and `ReadStateTracker`.
//!
//! # Module Structure
//!
//! ```text
//! handlers/
//! ├── mod.rs      - Module exports and documentation
//! ├── send.rs     - PUT /channels/{id}/messages
//! ├── history.rs  - GET /channels/{id}/messages
//! └── receipts.rs - GET /channels/{id}/read-state, GET /channels/{id}/receipts
//! ```

/// Send handler
pub mod send;

/// Catch-up handler
pub mod history;

/// Read-state query handlers
pub mod receipts;

pub use history::handle_catch_up;
pub use receipts::{handle_channel_receipts, handle_read_state};
pub use send::handle_send_message;
