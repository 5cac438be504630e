//! Configuration for the cache facade

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable prefix read by [`CacheConfig::from_env`]
pub const ENV_PREFIX: &str = "OUROBOROS_CACHE";

/// How caught errors are surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Report to the error sink and return the operation's failure value
    #[default]
    Lenient,
    /// Report to the error sink and return the error to the caller
    Strict,
}

impl std::str::FromStr for ErrorMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(ErrorMode::Lenient),
            "strict" => Ok(ErrorMode::Strict),
            other => Err(CacheError::Config(format!(
                "unknown error mode '{}', expected 'strict' or 'lenient'",
                other
            ))),
        }
    }
}

/// Connection and behaviour settings for one named cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Registry name of the instance
    pub name: String,

    /// Backend host
    pub host: String,

    /// Backend port
    pub port: u16,

    /// Namespace inside the backend; every key of this instance lives in it
    pub database: String,

    /// Upper bound for the connect handshake
    pub timeout: Duration,

    /// Error surfacing policy
    pub mode: ErrorMode,

    /// Health checks slower than this report `Degraded`
    pub degraded_threshold: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: "default".to_string(),
            timeout: Duration::from_millis(500),
            mode: ErrorMode::Lenient,
            degraded_threshold: Duration::from_millis(100),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::Config("name must not be empty".to_string()));
        }

        if self.host.trim().is_empty() {
            return Err(CacheError::Config("host must not be empty".to_string()));
        }

        if self.port == 0 {
            return Err(CacheError::Config("port must be greater than 0".to_string()));
        }

        if self.database.trim().is_empty() {
            return Err(CacheError::Config("database must not be empty".to_string()));
        }

        if self.timeout.is_zero() {
            return Err(CacheError::Config("timeout must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn is_strict(&self) -> bool {
        self.mode == ErrorMode::Strict
    }

    /// Load configuration from the environment (and a `.env` file if present)
    ///
    /// Reads `OUROBOROS_CACHE_NAME`, `_HOST`, `_PORT`, `_DATABASE`,
    /// `_TIMEOUT_MS` and `_MODE`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| lookup(&format!("{}_{}", ENV_PREFIX, suffix));
        let mut builder = Self::builder();

        if let Some(name) = var("NAME") {
            builder = builder.name(name);
        }
        if let Some(host) = var("HOST") {
            builder = builder.host(host);
        }
        if let Some(port) = var("PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|e| CacheError::Config(format!("invalid port '{}': {}", port, e)))?;
            builder = builder.port(port);
        }
        if let Some(database) = var("DATABASE") {
            builder = builder.database(database);
        }
        if let Some(timeout) = var("TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|e| {
                CacheError::Config(format!("invalid timeout '{}': {}", timeout, e))
            })?;
            builder = builder.timeout(Duration::from_millis(millis));
        }
        if let Some(mode) = var("MODE") {
            builder = builder.mode(mode.parse()?);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    timeout: Option<Duration>,
    mode: Option<ErrorMode>,
    degraded_threshold: Option<Duration>,
}

impl CacheConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn mode(mut self, mode: ErrorMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Shorthand for `mode(ErrorMode::Strict)`
    pub fn strict(self) -> Self {
        self.mode(ErrorMode::Strict)
    }

    pub fn degraded_threshold(mut self, threshold: Duration) -> Self {
        self.degraded_threshold = Some(threshold);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            name: self.name.unwrap_or(defaults.name),
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            database: self.database.unwrap_or(defaults.database),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            mode: self.mode.unwrap_or(defaults.mode),
            degraded_threshold: self
                .degraded_threshold
                .unwrap_or(defaults.degraded_threshold),
        }
    }
}

/// Preset configurations
impl CacheConfig {
    /// Development: errors propagate to the caller
    pub fn development() -> Self {
        Self {
            mode: ErrorMode::Strict,
            ..Default::default()
        }
    }

    /// Production: errors are logged and the cache degrades to misses
    pub fn production() -> Self {
        Self {
            mode: ErrorMode::Lenient,
            timeout: Duration::from_millis(250),
            ..Default::default()
        }
    }
}
