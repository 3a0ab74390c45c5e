//! Real-time Module
//!
//! Live delivery of committed messages and read receipts.
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs          - Module exports and documentation
//! ├── bus.rs          - BroadcastBus trait, LocalBus, PgNotifyBus
//! ├── broadcast.rs    - timeout-bounded publish helper
//! ├── fanout.rs       - local sessions and per-channel bus bridges
//! ├── subscription.rs - SSE live stream with gap-fill
//! └── frames.rs       - inbound READ / RESEND_REQUEST frames
//! ```
//!
//! # Delivery Model
//!
//! The bus is fire-and-forget: a publish that fails or times out is skipped
//! and the message stays committed. Every process subscribes to the topics
//! its local sessions care about and fans events out without blocking on any
//! one session. Clients that miss events recover through catch-up.

/// Broadcast bus transports
pub mod bus;

/// Publish helper
pub mod broadcast;

/// Connection fan-out
pub mod fanout;

/// SSE subscription handler
pub mod subscription;

/// Client frame handler
pub mod frames;

pub use broadcast::{publish_live, PublishOutcome};
pub use bus::{BroadcastBus, EnvelopeStream, LocalBus, PgNotifyBus};
pub use fanout::{DeliveryReport, FanoutHub, LiveSession};
pub use frames::handle_client_frame;
pub use subscription::handle_live_subscription;
