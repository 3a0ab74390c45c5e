//! Server Module
//!
//! Startup of the Axum HTTP server: configuration, wiring of the chat core
//! and the application state shared by every handler.
//!
//! # Module Structure
//!
//! ```text
//! server/
//! ├── mod.rs          - Module exports and documentation
//! ├── state.rs        - AppState and FromRef implementations
//! ├── config.rs       - Configuration and database loading
//! └── init.rs         - Component wiring, background tasks, app creation
//! ```
//!
//! # Initialization Flow
//!
//! 1. **Configuration Loading**: file, environment, defaults
//! 2. **Database**: optional PostgreSQL pool with migrations
//! 3. **State Creation**: store, bus, mirror, tracker, chat service, fan-out
//! 4. **Background Tasks**: write-behind worker, retry drain, topic cleanup
//! 5. **Router Creation**: all routes configured with `AppState`

/// Application state management
pub mod state;

/// Server configuration loading
pub mod config;

/// Server initialization
pub mod init;

pub use config::{load_config, load_database};
pub use init::{build_state, create_app, BackgroundTasks, Components};
pub use state::AppState;
