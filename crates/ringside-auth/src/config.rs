//! Auth gate and token cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Errors raised while validating auth configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The HTTP client for fallback verification could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Auth gate configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [gate]
/// issuer_base_url = "http://auth-service:8000"
/// public_prefixes = ["/matches", "/ratings/top"]
/// verify_timeout = "3s"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Base URL of the issuing service. The gate calls `<base>/users/me`
    /// when a token is not in the local cache.
    pub issuer_base_url: String,

    /// Liveness path that is always let through.
    pub health_path: String,

    /// Path prefixes readable without credentials (GET/HEAD only).
    pub public_prefixes: Vec<String>,

    /// Upper bound for a fallback verification call.
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,

    /// Store identities returned by the fallback call in the local cache.
    pub populate_on_verify: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            issuer_base_url: "http://localhost:8000".to_string(),
            health_path: "/health".to_string(),
            public_prefixes: Vec::new(),
            verify_timeout: Duration::from_secs(3),
            populate_on_verify: true,
        }
    }
}

impl GateConfig {
    /// Parses the issuing service base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an absolute http(s) URL.
    pub fn issuer_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.issuer_base_url).map_err(|e| {
            ConfigError::InvalidValue(format!(
                "issuer_base_url '{}' is not a valid URL: {e}",
                self.issuer_base_url
            ))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidValue(format!(
                "issuer_base_url must use http or https, got '{other}'"
            ))),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.issuer_url()?;

        if !self.health_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(
                "health_path must start with '/'".to_string(),
            ));
        }

        if let Some(prefix) = self.public_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::InvalidValue(format!(
                "public prefix '{prefix}' must start with '/'"
            )));
        }

        if self.verify_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "verify_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Token cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to send every protected request through the fallback path.
    pub enabled: bool,

    /// How long a cached token stays valid.
    /// Matches the issuing service's session lifetime by default.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Interval of the background sweep that drops expired entries.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a duration is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.ttl.is_zero() {
            return Err(ConfigError::InvalidValue("cache ttl must be > 0".to_string()));
        }
        if self.enabled && self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "cache sweep_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
