use ringside_auth::{CacheConfig, GateConfig};
use ringside_events::ChannelConfig;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Session event channel (Redis Streams)
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Auth gate for downstream services
    #[serde(default)]
    pub gate: GateConfig,
    /// Token cache for downstream services
    #[serde(default)]
    pub cache: CacheConfig,
    /// Session issuing
    #[serde(default)]
    pub issuer: IssuerConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.service.name.trim().is_empty() {
            return Err("service.name must not be empty".into());
        }
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        self.server.cors.validate()?;
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.channel.validate()?;
        match self.service.role {
            ServiceRole::Issuer => {
                if self.issuer.session_ttl.is_zero() {
                    return Err("issuer.session_ttl must be > 0".into());
                }
            }
            ServiceRole::Downstream => {
                self.gate
                    .validate()
                    .map_err(|e| format!("gate config error: {e}"))?;
                self.cache
                    .validate()
                    .map_err(|e| format!("cache config error: {e}"))?;
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Consumer group for this service: explicit setting or the service name.
    pub fn consumer_group(&self) -> String {
        self.channel
            .consumer_group
            .clone()
            .unwrap_or_else(|| self.service.name.clone())
    }

    /// Consumer name within the group: explicit setting, host name, or the service name.
    pub fn consumer_name(&self) -> String {
        self.channel.consumer_name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| self.service.name.clone())
        })
    }
}

/// Which half of the session flow this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Authenticates users, issues tokens and publishes session events.
    Issuer,
    /// Consumes session events and guards its routes with the auth gate.
    #[default]
    Downstream,
}

impl std::fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Issuer => write!(f, "issuer"),
            Self::Downstream => write!(f, "downstream"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Reported by the health endpoint and used as the default consumer group.
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub role: ServiceRole,
}

fn default_service_name() -> String {
    "ringside".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            role: ServiceRole::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            cors: CorsConfig::default(),
        }
    }
}

/// Cross-origin access for browser clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,
    /// Allowed origins; empty allows any origin.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

fn default_cors_enabled() -> bool {
    true
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            allow_origins: Vec::new(),
        }
    }
}

impl CorsConfig {
    pub fn validate(&self) -> Result<(), String> {
        for origin in &self.allow_origins {
            if origin.parse::<axum::http::HeaderValue>().is_err() || origin.trim() == "*" {
                return Err(format!("server.cors.allow_origins has invalid origin {origin:?}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    /// Lifetime of an issued session token.
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            session_ttl: default_session_ttl(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "ringside.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., RINGSIDE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("RINGSIDE")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("gate.public_prefixes"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
