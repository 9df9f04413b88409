//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server starts with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use thinky_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Explicit SQLite database path. When unset, the platform data
    /// directory is used.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Thinky"`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Sustained per-IP request rate (requests per second).
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `5`
    pub rate_limit_per_sec: f64,

    /// Per-IP burst capacity.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `20`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_path: None,
            instance_name: "Thinky".to_string(),
            admin_token: None,
            rate_limit_per_sec: 5.0,
            rate_limit_burst: 20.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_PER_SEC") {
            if let Ok(rate) = val.parse::<f64>() {
                if rate > 0.0 {
                    config.rate_limit_per_sec = rate;
                }
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_BURST") {
            if let Ok(burst) = val.parse::<f64>() {
                if burst >= 1.0 {
                    config.rate_limit_burst = burst;
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
