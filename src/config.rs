//! Server configuration loaded from environment variables.
//!
//! All settings have development defaults; in production configure them via
//! the environment or a `.env` file.
//!
//! # Admission Control
//!
//! - `RATE_LIMIT_REQUESTS_PER_MINUTE`: requests per client per window (default: 60, 0 disables)
//! - `RATE_LIMIT_WINDOW_SECS`: window length (default: 60)
//! - `RATE_LIMIT_BYPASS_PATHS`: comma-separated exempt paths (default: `/health,/metrics`)
//!
//! # Authentication
//!
//! - `API_KEYS`: comma-separated accepted keys (default: empty, authentication disabled)
//! - `API_KEY_HEADER`: header carrying the key (default: `X-API-Key`)
//! - `AUTH_BYPASS_PATHS`: comma-separated public paths (default: `/health,/metrics`)
//!
//! # Caching
//!
//! - `CACHE_TTL_SECS`: lifetime of cached metadata (default: 300)
//! - `CACHE_CLEANUP_INTERVAL_SECS`: maintenance sweep interval (default: 60)

use std::env;
use std::time::Duration;

use crate::error::{EampError, EampResult};

/// Server configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1 MiB)
    pub max_request_body_size: usize,

    /// Allowed CORS origins; `*` allows all
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests admitted per client per window (default: 60)
    /// Set to 0 to disable rate limiting
    pub rate_limit_requests: u32,

    /// Sliding window length (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Paths that are never counted nor annotated.
    /// Default: ["/health", "/metrics"]
    pub rate_limit_bypass_paths: Vec<String>,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Accepted API keys; empty disables authentication
    pub api_keys: Vec<String>,

    /// Header carrying the API key (default: "X-API-Key")
    pub api_key_header: String,

    /// Paths reachable without a key.
    /// Default: ["/health", "/metrics"]
    pub auth_bypass_paths: Vec<String>,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Lifetime of cached metadata (default: 5 minutes)
    pub cache_ttl: Duration,

    /// Interval of the background cache cleanup and limiter sweep (default: 60s)
    pub cache_cleanup_interval: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `EampError::Configuration` if a value does not parse or fails
    /// validation.
    pub fn from_env() -> EampResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),

            // Rate limiting
            rate_limit_requests: Self::parse_env("RATE_LIMIT_REQUESTS_PER_MINUTE", 60)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_bypass_paths: Self::parse_list("RATE_LIMIT_BYPASS_PATHS", "/health,/metrics")
                .into_iter()
                .filter(|p| p.starts_with('/'))
                .collect(),

            // Authentication
            api_keys: Self::parse_list("API_KEYS", ""),
            api_key_header: env::var("API_KEY_HEADER")
                .map(|h| h.trim().to_string())
                .unwrap_or_else(|_| "X-API-Key".to_string()),
            auth_bypass_paths: Self::parse_list("AUTH_BYPASS_PATHS", "/health,/metrics")
                .into_iter()
                .filter(|p| p.starts_with('/'))
                .collect(),

            // Cache
            cache_ttl: Duration::from_secs(Self::parse_env("CACHE_TTL_SECS", 300)?),
            cache_cleanup_interval: Duration::from_secs(Self::parse_env(
                "CACHE_CLEANUP_INTERVAL_SECS",
                60,
            )?),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `EampError::Configuration` if validation fails.
    fn validate(&self) -> EampResult<()> {
        if self.rate_limit_window.is_zero() {
            return Err(EampError::Configuration(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl.is_zero() {
            return Err(EampError::Configuration(
                "CACHE_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.cache_cleanup_interval.is_zero() {
            return Err(EampError::Configuration(
                "CACHE_CLEANUP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(EampError::Configuration(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if axum::http::HeaderName::from_bytes(self.api_key_header.as_bytes()).is_err() {
            return Err(EampError::Configuration(format!(
                "API_KEY_HEADER '{}' is not a valid header name",
                self.api_key_header
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_requests > 0
    }

    /// Check if API key authentication is enabled.
    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> EampResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| EampError::Configuration(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_body_size: 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
            // Rate limiting
            rate_limit_requests: 60,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_bypass_paths: vec!["/health".to_string(), "/metrics".to_string()],
            // Authentication
            api_keys: Vec::new(),
            api_key_header: "X-API-Key".to_string(),
            auth_bypass_paths: vec!["/health".to_string(), "/metrics".to_string()],
            // Cache
            cache_ttl: Duration::from_secs(300),
            cache_cleanup_interval: Duration::from_secs(60),
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
