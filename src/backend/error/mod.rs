//! Backend Error Module
//!
//! Error types for the chat core and their HTTP conversions.
//!
//! # Module Structure
//!
//! ```text
//! error/
//! ├── mod.rs        - Module exports and documentation
//! ├── types.rs      - Error type definitions and SendOutcome
//! └── conversion.rs - IntoResponse implementations
//! ```

/// Error type definitions
pub mod types;

/// Error conversion implementations
pub mod conversion;

// Re-export commonly used types
pub use types::{
    AccessError, BackendError, BusError, MirrorError, OrderingError, SendOutcome, StoreError,
};
