//! Process configuration, read from TOML with environment overrides.
//!
//! ```toml
//! [server]
//! addr = "0.0.0.0:8000"        # or a host name, e.g. "localhost:8000"
//! max_body_bytes = 2097152
//!
//! [database]
//! pool_size = 16
//! checkout_timeout_ms = 5000
//!
//! [auth]
//! cookie_name = "session_id"
//! password_salt = "change-me"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! Every key is optional. `STRATA_ADDR` and `STRATA_LOG` override the
//! listen address and log level.

use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::middleware::DEFAULT_SESSION_COOKIE;
use crate::server::DEFAULT_MAX_BODY_BYTES;

pub const ADDR_ENV: &str = "STRATA_ADDR";
pub const LOG_ENV: &str = "STRATA_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// `host:port`. Host names are resolved once, at startup.
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Larger request bodies are answered with `413 Payload Too Large`.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Maximum sessions checked out at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a request waits for a free session before failing.
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Site-wide secret mixed into stored password hashes. The middleware
    /// never reads it; it is here for the application's account handling.
    #[serde(default)]
    pub password_salt: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive, e.g. `info` or `strata=debug,hyper=warn`.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_addr() -> String { "127.0.0.1:8000".to_owned() }
fn default_max_body_bytes() -> usize { DEFAULT_MAX_BODY_BYTES }
fn default_pool_size() -> usize { 16 }
fn default_checkout_timeout_ms() -> u64 { 5_000 }
fn default_cookie_name() -> String { DEFAULT_SESSION_COOKIE.to_owned() }
fn default_level() -> String { "info".to_owned() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: default_addr(), max_body_bytes: default_max_body_bytes() }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { cookie_name: default_cookie_name(), password_salt: String::new() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self { Self { level: default_level(), format: LogFormat::default() } }
}

impl Config {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `STRATA_ADDR` / `STRATA_LOG` when set, then re-validates.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(env::var(ADDR_ENV).ok(), env::var(LOG_ENV).ok())
    }

    fn apply_overrides(
        mut self,
        addr: Option<String>,
        level: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(addr) = addr {
            self.server.addr = addr;
        }
        if let Some(level) = level {
            self.logging.level = level;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "server.max_body_bytes",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "database.pool_size",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.auth.cookie_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "auth.cookie_name",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    /// The first address `server.addr` resolves to. IP literals are used as
    /// they are; host names go through the system resolver.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid { key: "server.addr", reason };
        self.server
            .addr
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid(format!("{} resolves to no address", self.server.addr)))
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.database.checkout_timeout_ms)
    }
}
