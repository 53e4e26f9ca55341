//! Configuration types for redir-relay
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::intercept::{parse_listen_addr, ResolverKind};
use crate::io::CopyStrategy;
use crate::upstream::dialer_from_url;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listener for redirected connections
    #[serde(default)]
    pub listen: ListenConfig,

    /// Upstream proxy
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Relay behaviour
    #[serde(default)]
    pub relay: RelayConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.upstream.validate()?;
        self.log.validate()?;
        Ok(())
    }
}

/// Listen configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (`:9040`, `127.0.0.1:9040`, `[::1]:9040`)
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// TCP accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl ListenConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        parse_listen_addr(&self.address)?;

        if self.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "listen.backlog must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            backlog: default_backlog(),
        }
    }
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Proxy URL (`socks5://[user:pass@]host[:port]` or `direct://`)
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,

    /// Bound on connect plus proxy handshake, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl UpstreamConfig {
    /// Connect timeout as a `Duration`
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "upstream.connect_timeout_secs must be greater than 0".into(),
            ));
        }

        dialer_from_url(&self.proxy_url, self.connect_timeout())?;
        Ok(())
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Copy implementation for both directions
    #[serde(default)]
    pub copy_strategy: CopyStrategy,

    /// How original destinations are recovered
    #[serde(default)]
    pub resolver: ResolverKind,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include the module target in each line
    #[serde(default)]
    pub target: bool,
}

impl LogConfig {
    /// Whether JSON output is selected
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "log.format must be 'text' or 'json', got '{}'",
                self.format
            )));
        }

        if !matches!(
            self.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "log.level must be one of trace, debug, info, warn, error; got '{}'",
                self.level
            )));
        }

        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: false,
        }
    }
}

fn default_listen_address() -> String {
    ":9040".into()
}

const fn default_backlog() -> u32 {
    1024
}

fn default_proxy_url() -> String {
    "socks5://192.168.1.210:1080".into()
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
