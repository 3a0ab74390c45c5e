//! Middleware Module
//!
//! Request processing shared by the HTTP handlers.
//!
//! - **`identity`** - caller identity extractor (`x-user-id`)

pub mod identity;

pub use identity::{CallerId, USER_ID_HEADER};
