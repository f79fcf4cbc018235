//! Environment-driven configuration.
//!
//! All settings have defaults so the proxy starts with no environment at all
//! (pointing at a controller on `127.0.0.1:9001`). Numeric values that fail to
//! parse fall back to their default with a warning; structural problems
//! (unparseable URLs, zero rate limits, half-configured credentials) are
//! returned as [`ConfigError`].
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HEARTHGATE_UPSTREAM_URL` | `http://127.0.0.1:9001` |
//! | `HEARTHGATE_ENUMERATION_CACHE_TTL_SECS` | 300 |
//! | `HEARTHGATE_STATE_CACHE_TTL_SECS` | 60 |
//! | `HEARTHGATE_RATE_LIMIT_REQUESTS` | 100 |
//! | `HEARTHGATE_RATE_LIMIT_WINDOW_SECS` | 60 |
//! | `HEARTHGATE_WEBHOOK_URL` | unset |
//! | `HEARTHGATE_EVENT_QUEUE_CAPACITY` | 256 |
//! | `HEARTHGATE_LOG_REQUESTS` | true |
//! | `HEARTHGATE_ADMIN_USERNAME` | unset |
//! | `HEARTHGATE_ADMIN_PASSWORD` | unset |
//! | `HEARTHGATE_REMOTE_ACCESS_ENABLED` | true |
//! | `HEARTHGATE_MAX_BODY_BYTES` | 1048576 |

use std::time::Duration;

use tracing::warn;

use crate::admin::AdminCredentials;
use crate::error::ConfigError;

/// Default downstream controller address (the local tunnel endpoint).
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:9001";

/// Runtime configuration for the edge proxy.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Base URL of the downstream controller.
    pub upstream_url: String,
    /// How long a successful enumeration is served from cache.
    pub enumeration_ttl: Duration,
    /// Nominal state freshness. State entries never expire; this value is
    /// only reported through the stats endpoint.
    pub state_ttl: Duration,
    /// Requests admitted per client within one window.
    pub rate_limit_requests: u32,
    /// Length of the sliding rate-limit window.
    pub rate_limit_window: Duration,
    /// Optional event notification target.
    pub webhook_url: Option<String>,
    /// Capacity of the event notification queue.
    pub event_queue_capacity: usize,
    /// Whether audit records are emitted.
    pub log_requests: bool,
    /// Admin credential pair. `None` leaves admin endpoints open.
    pub admin_credentials: Option<AdminCredentials>,
    /// Initial remote-access flag.
    pub remote_access_enabled: bool,
    /// Largest accepted inbound fulfillment body.
    pub max_body_bytes: usize,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            enumeration_ttl: Duration::from_secs(300),
            state_ttl: Duration::from_secs(60),
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            webhook_url: None,
            event_queue_capacity: 256,
            log_requests: true,
            admin_credentials: None,
            remote_access_enabled: true,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl EdgeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a URL does not parse, a rate-limit
    /// parameter is zero, or only one half of the admin pair is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let upstream_url = non_empty_env("HEARTHGATE_UPSTREAM_URL")
            .unwrap_or_else(|| default.upstream_url.clone());

        let admin_credentials = match (
            non_empty_env("HEARTHGATE_ADMIN_USERNAME"),
            non_empty_env("HEARTHGATE_ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(AdminCredentials::new(username, password)),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteAdminCredentials),
        };

        let config = Self {
            upstream_url,
            enumeration_ttl: Duration::from_secs(parse_env_warn(
                "HEARTHGATE_ENUMERATION_CACHE_TTL_SECS",
                default.enumeration_ttl.as_secs(),
            )),
            state_ttl: Duration::from_secs(parse_env_warn(
                "HEARTHGATE_STATE_CACHE_TTL_SECS",
                default.state_ttl.as_secs(),
            )),
            rate_limit_requests: parse_env_warn(
                "HEARTHGATE_RATE_LIMIT_REQUESTS",
                default.rate_limit_requests,
            ),
            rate_limit_window: Duration::from_secs(parse_env_warn(
                "HEARTHGATE_RATE_LIMIT_WINDOW_SECS",
                default.rate_limit_window.as_secs(),
            )),
            webhook_url: non_empty_env("HEARTHGATE_WEBHOOK_URL"),
            event_queue_capacity: parse_env_warn(
                "HEARTHGATE_EVENT_QUEUE_CAPACITY",
                default.event_queue_capacity,
            ),
            log_requests: parse_bool_env("HEARTHGATE_LOG_REQUESTS", default.log_requests),
            admin_credentials,
            remote_access_enabled: parse_bool_env(
                "HEARTHGATE_REMOTE_ACCESS_ENABLED",
                default.remote_access_enabled,
            ),
            max_body_bytes: parse_env_warn("HEARTHGATE_MAX_BODY_BYTES", default.max_body_bytes),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check structural invariants.
    ///
    /// # Errors
    ///
    /// See [`EdgeConfig::from_env`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = reqwest::Url::parse(&self.upstream_url) {
            return Err(ConfigError::InvalidUpstreamUrl {
                url: self.upstream_url.clone(),
                reason: e.to_string(),
            });
        }
        if let Some(ref url) = self.webhook_url
            && let Err(e) = reqwest::Url::parse(url)
        {
            return Err(ConfigError::InvalidWebhookUrl {
                url: url.clone(),
                reason: e.to_string(),
            });
        }
        if self.rate_limit_requests == 0 {
            return Err(ConfigError::ZeroRateLimit {
                name: "HEARTHGATE_RATE_LIMIT_REQUESTS",
            });
        }
        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::ZeroRateLimit {
                name: "HEARTHGATE_RATE_LIMIT_WINDOW_SECS",
            });
        }
        Ok(())
    }
}

/// Read an environment variable, treating empty strings as unset.
fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable with a warning on invalid values.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
fn parse_bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                warn!(
                    env_var = name,
                    value = %val,
                    default,
                    "Invalid boolean for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}
