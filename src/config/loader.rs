//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::debug;

use super::types::Config;
use crate::error::ConfigError;
use crate::upstream::redact_proxy_url;

/// Environment variable overriding `listen.address`
pub const ENV_LISTEN: &str = "REDIR_RELAY_LISTEN";
/// Environment variable overriding `upstream.proxy_url`
pub const ENV_PROXY: &str = "REDIR_RELAY_PROXY";
/// Environment variable overriding `log.level`
pub const ENV_LOG_LEVEL: &str = "REDIR_RELAY_LOG_LEVEL";
/// Environment variable overriding `relay.copy_strategy`
pub const ENV_COPY_STRATEGY: &str = "REDIR_RELAY_COPY_STRATEGY";

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// The result is not validated: environment and command line layers may
/// still replace values, so callers validate once every layer is applied.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    debug!(
        "Configuration loaded: listen={}, upstream={}",
        config.listen.address,
        redact_proxy_url(&config.upstream.proxy_url)
    );

    Ok(config)
}

/// Load configuration from a JSON string. Like [`load_config`], the result
/// is not validated.
///
/// # Errors
///
/// Returns `ConfigError::ParseError` if the JSON is malformed.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Apply environment variable overrides from the process environment.
///
/// Environment variables:
/// - `REDIR_RELAY_LISTEN`: Override listen address
/// - `REDIR_RELAY_PROXY`: Override upstream proxy URL
/// - `REDIR_RELAY_LOG_LEVEL`: Override log level
/// - `REDIR_RELAY_COPY_STRATEGY`: Override copy strategy (`splice` or `buffered`)
///
/// The result is not validated; callers validate once all layers are applied.
///
/// # Errors
///
/// Returns `ConfigError::EnvError` if a value cannot be interpreted.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

/// Apply overrides from an arbitrary variable lookup
///
/// # Errors
///
/// Returns `ConfigError::EnvError` if a value cannot be interpreted.
pub fn apply_overrides_from<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup(ENV_LISTEN) {
        config.listen.address = addr;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    if let Some(url) = lookup(ENV_PROXY) {
        config.upstream.proxy_url = url;
        debug!(
            "Proxy URL overridden to {}",
            redact_proxy_url(&config.upstream.proxy_url)
        );
    }

    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(strategy) = lookup(ENV_COPY_STRATEGY) {
        config.relay.copy_strategy = strategy.parse().map_err(|reason| ConfigError::EnvError {
            name: ENV_COPY_STRATEGY.into(),
            reason,
        })?;
        debug!("Copy strategy overridden to {}", config.relay.copy_strategy);
    }

    Ok(())
}
