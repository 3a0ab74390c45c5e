/**
 * Server Configuration
 *
 * Loads `AppConfig` and the optional PostgreSQL pool.
 *
 * # Configuration Sources
 *
 * In order of precedence:
 * 1. environment variables (a `.env` file is loaded first if present)
 * 2. the TOML file named by `XFCHAT_CONFIG`
 * 3. built-in defaults
 *
 * | Variable | Field |
 * |---|---|
 * | `XFCHAT_SERVER_ID` | `server_id` |
 * | `XFCHAT_SERVER_COUNT` | `server_count` |
 * | `SERVER_PORT` | `bind_port` |
 * | `DATABASE_URL` | `database_url` |
 * | `XFCHAT_PUBLISH_TIMEOUT_MS` | `publish_timeout` |
 * | `XFCHAT_DRAIN_INTERVAL_MS` | `drain_interval` |
 * | `XFCHAT_RETRY_CAPACITY` | `retry_capacity` |
 * | `XFCHAT_SESSION_BUFFER` | `session_buffer` |
 *
 * # Error Handling
 *
 * A bad configuration value stops startup. A database that cannot be reached
 * does not: the server logs it and runs on in-memory stores.
 */

use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_PATH_VAR: &str = "XFCHAT_CONFIG";

/// Database configuration result
///
/// `None` when no database is configured or it could not be reached.
pub type DatabaseConfig = Option<PgPool>;

fn parse_var<T>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        field,
        reason: format!("{:?}: {}", raw, e),
    })
}

/// Apply environment overrides using `lookup` to read variables
pub fn apply_env<F>(mut builder: AppConfigBuilder, lookup: F) -> Result<AppConfigBuilder, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("XFCHAT_SERVER_ID") {
        builder = builder.server_id(parse_var("server_id", &raw)?);
    }
    if let Some(raw) = lookup("XFCHAT_SERVER_COUNT") {
        builder = builder.server_count(parse_var("server_count", &raw)?);
    }
    if let Some(raw) = lookup("SERVER_PORT") {
        builder = builder.bind_port(parse_var("bind_port", &raw)?);
    }
    if let Some(raw) = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
        builder = builder.database_url(raw);
    }
    if let Some(raw) = lookup("XFCHAT_PUBLISH_TIMEOUT_MS") {
        builder = builder.publish_timeout(Duration::from_millis(parse_var("publish_timeout", &raw)?));
    }
    if let Some(raw) = lookup("XFCHAT_DRAIN_INTERVAL_MS") {
        builder = builder.drain_interval(Duration::from_millis(parse_var("drain_interval", &raw)?));
    }
    if let Some(raw) = lookup("XFCHAT_RETRY_CAPACITY") {
        builder = builder.retry_capacity(parse_var("retry_capacity", &raw)?);
    }
    if let Some(raw) = lookup("XFCHAT_SESSION_BUFFER") {
        builder = builder.session_buffer(parse_var("session_buffer", &raw)?);
    }
    if let Some(raw) = lookup("XFCHAT_READ_STATE_IDLE_SECS") {
        builder = builder.read_state_idle(Duration::from_secs(parse_var("read_state_idle", &raw)?));
    }
    if let Some(raw) = lookup("XFCHAT_HYDRATION_LIMIT") {
        builder = builder.hydration_limit(parse_var("hydration_limit", &raw)?);
    }
    Ok(builder)
}

/// Load the application configuration from file and environment
pub fn load_config() -> Result<AppConfig, ConfigError> {
    dotenv::dotenv().ok();

    let builder = match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) => {
            tracing::info!("[Server] Reading configuration from {}", path);
            let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            AppConfigBuilder::from_toml_str(&raw)?
        }
        Err(_) => AppConfig::builder(),
    };

    apply_env(builder, |name| std::env::var(name).ok())?.build()
}

/// Connect to PostgreSQL and run migrations
///
/// Returns `None` when `database_url` is `None` or the connection fails;
/// the server then runs on in-memory stores.
pub async fn load_database(database_url: Option<&str>) -> DatabaseConfig {
    let Some(database_url) = database_url else {
        tracing::warn!("[Server] DATABASE_URL not set. Running on in-memory stores (single node).");
        return None;
    };

    tracing::info!("[Server] Connecting to database...");

    let pool = match PgPool::connect(database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("[Server] Failed to create database connection pool: {:?}", e);
            tracing::warn!("[Server] Falling back to in-memory stores.");
            return None;
        }
    };

    tracing::info!("[Server] Running database migrations...");
    match sqlx::migrate!().run(&pool).await {
        Ok(_) => tracing::info!("[Server] Database migrations completed successfully"),
        Err(e) => {
            tracing::error!("[Server] Failed to run database migrations: {}", e);
            tracing::warn!("[Server] Continuing; the schema might not be up to date");
        }
    }

    Some(pool)
}
