//! Server configuration parsed from environment variables.
//!
//! Every knob has a typed default; unparsable values fall back to the default
//! rather than aborting startup.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_STREAM_BUFFER: usize = 256;
pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;
pub const MAX_ACTIVITY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// `None` runs the server against the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Keep-alive period for streaming connections.
    pub heartbeat_interval: Duration,
    /// Per-connection event buffer. A full buffer counts as a failed delivery.
    pub stream_buffer: usize,
    pub activity_default_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            activity_default_limit: DEFAULT_ACTIVITY_LIMIT,
        }
    }
}

impl Config {
    /// Build typed config from environment variables.
    ///
    /// - `PORT`: default 3000
    /// - `DATABASE_URL`: optional
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `HEARTBEAT_INTERVAL_MS`: default 30000, zero is treated as unset
    /// - `STREAM_BUFFER`: default 256, minimum 1
    /// - `ACTIVITY_DEFAULT_LIMIT`: default 20, capped at 100
    #[must_use]
    pub fn from_env() -> Self {
        let heartbeat_ms = match env_parse("HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS) {
            0 => DEFAULT_HEARTBEAT_INTERVAL_MS,
            ms => ms,
        };

        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            stream_buffer: env_parse("STREAM_BUFFER", DEFAULT_STREAM_BUFFER).max(1),
            activity_default_limit: env_parse("ACTIVITY_DEFAULT_LIMIT", DEFAULT_ACTIVITY_LIMIT).clamp(1, MAX_ACTIVITY_LIMIT),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
