//! Read-State Module
//!
//! Per-user, per-channel read receipts and unread tracking.
//!
//! # Module Structure
//!
//! ```text
//! read_state/
//! ├── mod.rs          - Module exports and documentation
//! ├── tracker.rs      - In-memory tracker (fast path)
//! ├── mirror.rs       - Durable mirror trait, in-memory and PostgreSQL mirrors
//! └── write_behind.rs - Asynchronous mirror writer
//! ```
//!
//! Read flow: client read action → tracker (immediate) → broadcast bus
//! (other sessions) → write-behind → mirror, with the retry buffer catching
//! mirror failures.

/// In-memory read-state tracker
pub mod tracker;

/// Durable read-state mirror
pub mod mirror;

/// Write-behind worker
pub mod write_behind;

pub use mirror::{InMemoryReadStateMirror, PgReadStateMirror, ReadStateMirror};
pub use tracker::{spawn_idle_sweep, ReadStateTracker, TrackerDeps};
pub use write_behind::{spawn_write_behind, WriteBehind};
