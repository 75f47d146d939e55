//! Broker Configuration
//!
//! Settings are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. An optional JSON file (keys in camelCase, unknown keys ignored)
//! 3. Environment: `HOST`, `PORT`, `AUTH_ENABLED`, `API_KEY`
//! 4. Command-line flags (applied by the CLI)
//!
//! Configuration is read once at startup.
//!
//! # Example
//!
//! ```
//! use cmdrelay_broker::config::BrokerConfig;
//!
//! let config: BrokerConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
//! assert_eq!(config.port, 9000);
//! assert_eq!(config.heartbeat_interval, 30_000);
//! ```

use cmdrelay_common::auth::AuthConfig;
use cmdrelay_common::rate_limit::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    InvalidValue { name: &'static str },

    #[error("authentication enabled but no API key configured")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted frame, in bytes
    pub max_payload: usize,
    /// Liveness probe interval, ms
    pub heartbeat_interval: u64,
    /// Command deadline, ms
    pub message_timeout: u64,
    /// How often expired commands are swept, ms
    pub sweep_interval: u64,
    pub rate_limit_enabled: bool,
    pub max_requests_per_minute: u32,
    /// Rate window length, ms
    pub rate_limit_window: u64,
    pub history_size: usize,
    pub auth_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_payload: cmdrelay_common::validator::DEFAULT_MAX_MESSAGE_SIZE,
            heartbeat_interval: 30_000,
            message_timeout: 30_000,
            sweep_interval: 1_000,
            rate_limit_enabled: true,
            max_requests_per_minute: cmdrelay_common::rate_limit::DEFAULT_MAX_REQUESTS,
            rate_limit_window: 60_000,
            history_size: 500,
            auth_enabled: false,
            api_key: None,
        }
    }
}

impl BrokerConfig {
    /// Loads defaults overlaid with the JSON file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the startup configuration: defaults, then the optional file,
    /// then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the background tasks cannot run with.
    ///
    /// # Errors
    ///
    /// `InvalidValue` naming the first zero interval, timeout or size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("heartbeatInterval", self.heartbeat_interval),
            ("messageTimeout", self.message_timeout),
            ("sweepInterval", self.sweep_interval),
            ("maxPayload", self.max_payload as u64),
        ];
        if let Some((name, _)) = positive.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue { name });
        }
        if self.rate_limit_enabled && self.rate_limit_window == 0 {
            return Err(ConfigError::InvalidValue {
                name: "rateLimitWindow",
            });
        }
        Ok(())
    }

    /// Applies environment overrides through `lookup`.
    ///
    /// Takes a lookup function rather than reading the process environment
    /// directly so callers and tests can supply their own source.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: "PORT", value: port })?;
        }
        if let Some(enabled) = lookup("AUTH_ENABLED") {
            self.auth_enabled = match enabled.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "AUTH_ENABLED",
                        value: enabled,
                    })
                }
            };
        }
        if let Some(key) = lookup("API_KEY") {
            self.api_key = Some(key);
        }
        Ok(())
    }

    /// `host:port`, resolved when the listener binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        if !self.rate_limit_enabled {
            return RateLimitConfig::disabled();
        }
        RateLimitConfig::new(
            self.max_requests_per_minute,
            Duration::from_millis(self.rate_limit_window),
        )
    }

    pub fn auth(&self) -> Result<AuthConfig, ConfigError> {
        match (self.auth_enabled, &self.api_key) {
            (false, _) => Ok(AuthConfig::disabled()),
            (true, Some(key)) if !key.is_empty() => Ok(AuthConfig::with_api_key(key.clone())),
            (true, _) => Err(ConfigError::MissingApiKey),
        }
    }
}
