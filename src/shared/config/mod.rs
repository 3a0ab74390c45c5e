//! Application configuration module
//!
//! `AppConfig` describes one server process: its slot in the active server
//! set, timeouts for the live path, and buffer sizes. Values come from an
//! optional TOML file and are then overridden through the builder (the
//! server layer feeds environment variables into it).
//!
//! ```toml
//! server_id = 2
//! server_count = 5
//! publish_timeout_ms = 50
//! drain_interval_ms = 5000
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BIND_PORT: u16 = 3000;
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_CAPACITY: usize = 10_000;
pub const DEFAULT_SESSION_BUFFER: usize = 256;
pub const DEFAULT_WRITE_BEHIND_CAPACITY: usize = 4_096;
pub const DEFAULT_READ_STATE_IDLE: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_HYDRATION_LIMIT: usize = 1_000;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// This process's id in `0..server_count`
    pub server_id: u32,
    /// Size of the active server set
    pub server_count: u32,
    pub bind_port: u16,
    /// PostgreSQL URL; `None` runs on in-memory stores
    pub database_url: Option<String>,
    /// Upper bound on a single broadcast publish
    pub publish_timeout: Duration,
    /// Period of the retry buffer drain task
    pub drain_interval: Duration,
    pub retry_capacity: usize,
    /// Queue depth per live connection
    pub session_buffer: usize,
    pub write_behind_capacity: usize,
    /// Cached read state untouched for this long is evicted
    pub read_state_idle: Duration,
    /// Most unread markers loaded when rebuilding a cold unread index
    pub hydration_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_id: 0,
            server_count: 1,
            bind_port: DEFAULT_BIND_PORT,
            database_url: None,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            retry_capacity: DEFAULT_RETRY_CAPACITY,
            session_buffer: DEFAULT_SESSION_BUFFER,
            write_behind_capacity: DEFAULT_WRITE_BEHIND_CAPACITY,
            read_state_idle: DEFAULT_READ_STATE_IDLE,
            hydration_limit: DEFAULT_HYDRATION_LIMIT,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.server_id >= self.server_count {
            return Err(ConfigError::InvalidValue {
                field: "server_id",
                reason: format!("{} is outside 0..{}", self.server_id, self.server_count),
            });
        }
        if self.publish_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "publish_timeout",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.drain_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "drain_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.read_state_idle.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "read_state_idle",
                reason: "must be non-zero".to_string(),
            });
        }
        for (field, value) in [
            ("retry_capacity", self.retry_capacity),
            ("session_buffer", self.session_buffer),
            ("write_behind_capacity", self.write_behind_capacity),
            ("hydration_limit", self.hydration_limit),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// On-disk form; every key is optional
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_id: Option<u32>,
    server_count: Option<u32>,
    bind_port: Option<u16>,
    database_url: Option<String>,
    publish_timeout_ms: Option<u64>,
    drain_interval_ms: Option<u64>,
    retry_capacity: Option<usize>,
    session_buffer: Option<usize>,
    write_behind_capacity: Option<usize>,
    read_state_idle_secs: Option<u64>,
    hydration_limit: Option<usize>,
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Seed the builder from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig =
            toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut builder = Self::default();
        if let Some(v) = file.server_id {
            builder = builder.server_id(v);
        }
        if let Some(v) = file.server_count {
            builder = builder.server_count(v);
        }
        if let Some(v) = file.bind_port {
            builder = builder.bind_port(v);
        }
        if let Some(v) = file.database_url {
            builder = builder.database_url(v);
        }
        if let Some(v) = file.publish_timeout_ms {
            builder = builder.publish_timeout(Duration::from_millis(v));
        }
        if let Some(v) = file.drain_interval_ms {
            builder = builder.drain_interval(Duration::from_millis(v));
        }
        if let Some(v) = file.retry_capacity {
            builder = builder.retry_capacity(v);
        }
        if let Some(v) = file.session_buffer {
            builder = builder.session_buffer(v);
        }
        if let Some(v) = file.write_behind_capacity {
            builder = builder.write_behind_capacity(v);
        }
        if let Some(v) = file.read_state_idle_secs {
            builder = builder.read_state_idle(Duration::from_secs(v));
        }
        if let Some(v) = file.hydration_limit {
            builder = builder.hydration_limit(v);
        }
        Ok(builder)
    }

    pub fn server_id(mut self, id: u32) -> Self {
        self.config.server_id = id;
        self
    }

    pub fn server_count(mut self, count: u32) -> Self {
        self.config.server_count = count;
        self
    }

    pub fn bind_port(mut self, port: u16) -> Self {
        self.config.bind_port = port;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.config.publish_timeout = timeout;
        self
    }

    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.config.drain_interval = interval;
        self
    }

    pub fn retry_capacity(mut self, capacity: usize) -> Self {
        self.config.retry_capacity = capacity;
        self
    }

    pub fn session_buffer(mut self, depth: usize) -> Self {
        self.config.session_buffer = depth;
        self
    }

    pub fn write_behind_capacity(mut self, capacity: usize) -> Self {
        self.config.write_behind_capacity = capacity;
        self
    }

    pub fn read_state_idle(mut self, idle: Duration) -> Self {
        self.config.read_state_idle = idle;
        self
    }

    pub fn hydration_limit(mut self, limit: usize) -> Self {
        self.config.hydration_limit = limit;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("failed to parse config file: {0}")]
    Parse(String),
    #[error("failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },
}
