//! Configuration for the haystack relay server.
//!
//! All configuration is loaded from environment variables.
//! No secrets are logged.

use std::path::PathBuf;
use std::time::Duration;

/// Upstream report fetch endpoint
pub const DEFAULT_UPSTREAM_URL: &str = "https://gateway.icloud.com/acsnservice/fetch";

/// Largest fetch window the upstream network serves (days)
pub const MAX_DAYS: u32 = 7;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Server port
    pub port: u16,

    // === Upstream ===
    /// Report fetch endpoint
    pub upstream_url: String,

    /// Timeout for a single upstream call (default: 30 seconds)
    pub upstream_timeout: Duration,

    /// Default fetch window when the request omits `days` (default: 7)
    pub default_days: u32,

    // === Credentials ===
    /// Anisette server base URL
    pub anisette_url: String,

    /// How long fetched anisette headers are reused (default: 60 seconds)
    pub anisette_ttl: Duration,

    /// Path to the stored account credentials (auth.json)
    pub credentials_path: PathBuf,

    /// Path to the master key used to unseal encrypted credentials
    pub master_key_path: PathBuf,

    // === Endpoint Basic Auth ===
    /// Username required from callers (optional)
    pub endpoint_user: Option<String>,

    /// Password required from callers (optional)
    pub endpoint_pass: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(6176),

            upstream_url: std::env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            upstream_timeout: Duration::from_secs(
                std::env::var("UPSTREAM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            default_days: std::env::var("DEFAULT_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|d| (1..=MAX_DAYS).contains(d))
                .unwrap_or(MAX_DAYS),

            anisette_url: std::env::var("ANISETTE_URL")
                .unwrap_or_else(|_| "http://anisette:6969".to_string()),
            anisette_ttl: Duration::from_secs(
                std::env::var("ANISETTE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            credentials_path: std::env::var("CREDENTIALS_PATH")
                .unwrap_or_else(|_| "data/auth.json".to_string())
                .into(),
            master_key_path: std::env::var("MASTER_KEY_PATH")
                .unwrap_or_else(|_| "data/master.key".to_string())
                .into(),

            endpoint_user: std::env::var("ENDPOINT_USER").ok().filter(|s| !s.is_empty()),
            endpoint_pass: std::env::var("ENDPOINT_PASS").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Check if endpoint Basic auth is configured
    pub fn endpoint_auth_configured(&self) -> bool {
        self.endpoint_user.is_some() && self.endpoint_pass.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
