//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Lifetime of entries stored without an explicit max age
    pub default_max_age: Duration,
    /// HTTP server port
    pub server_port: u16,
    /// Directory for durable records; `None` disables durability
    pub durable_dir: Option<PathBuf>,
    /// Base URL that `/fetch` requests are forwarded to
    pub upstream_url: Option<String>,
    /// Lifetime of responses fetched from the upstream
    pub upstream_max_age: Duration,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DEFAULT_MAX_AGE_MS` - Default entry lifetime in milliseconds (default: 60000)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `DURABLE_DIR` - Directory for durable records (default: unset, no durability)
    /// - `UPSTREAM_URL` - Upstream base URL for `/fetch` (default: unset)
    /// - `UPSTREAM_MAX_AGE_MS` - Lifetime of upstream responses (default: 600000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_max_age: millis_var("DEFAULT_MAX_AGE_MS").unwrap_or(defaults.default_max_age),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            durable_dir: non_empty_var("DURABLE_DIR").map(PathBuf::from),
            upstream_url: non_empty_var("UPSTREAM_URL"),
            upstream_max_age: millis_var("UPSTREAM_MAX_AGE_MS").unwrap_or(defaults.upstream_max_age),
        }
    }
}

fn millis_var(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_max_age: Duration::from_millis(60_000),
            server_port: 3000,
            durable_dir: None,
            upstream_url: None,
            upstream_max_age: Duration::from_millis(600_000),
        }
    }
}
