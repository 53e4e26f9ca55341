//! Configuration module for redir-relay
//!
//! Layers, lowest precedence first: built-in defaults, the JSON config file,
//! `REDIR_RELAY_*` environment variables, command line flags.
//!
//! # Example
//!
//! ```no_run
//! use redir_relay::config::{apply_env_overrides, load_config};
//!
//! let mut config = load_config("/etc/redir-relay/config.json").unwrap();
//! apply_env_overrides(&mut config).unwrap();
//! config.validate().unwrap();
//! println!("Upstream: {}", config.upstream.proxy_url);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, apply_overrides_from, load_config, load_config_str, ENV_COPY_STRATEGY,
    ENV_LISTEN, ENV_LOG_LEVEL, ENV_PROXY,
};
pub use types::{Config, ListenConfig, LogConfig, RelayConfig, UpstreamConfig};
