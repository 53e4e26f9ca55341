//! redir-relay: transparent TCP relay for NAT-redirected connections
//!
//! Connections that a netfilter `REDIRECT` rule sends to the relay are
//! matched back to the destination the client originally addressed, then
//! tunneled there through an upstream proxy.
//!
//! # Architecture
//!
//! ```text
//! Client → iptables REDIRECT → redir-relay ──SO_ORIGINAL_DST──→ original destination
//!                                   ↓
//!                            Dialer (SOCKS5 tunnel)
//!                                   ↓
//!                     relay pair (client ⇄ upstream)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use redir_relay::config::Config;
//! use redir_relay::connection::{HandlerContext, Supervisor};
//! use redir_relay::intercept::{default_resolver, InterceptListener};
//! use redir_relay::upstream::dialer_from_url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let ctx = HandlerContext {
//!     resolver: default_resolver(config.relay.resolver),
//!     dialer: dialer_from_url(&config.upstream.proxy_url, config.upstream.connect_timeout())?,
//!     copy_strategy: config.relay.copy_strategy,
//! };
//!
//! let listener = InterceptListener::from_config(&config.listen)?;
//! let supervisor = Arc::new(Supervisor::new(ctx));
//! let shutdown = supervisor.shutdown_handle();
//!
//! // Call shutdown.shutdown() from a signal handler to stop accepting
//! supervisor.run(listener).await;
//! supervisor.wait_idle().await;
//! # let _ = shutdown;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Connection handler, accept loop supervisor, statistics
//! - [`error`]: Error types
//! - [`intercept`]: Original destination lookup and the intercept listener
//! - [`io`]: Relay loops (buffered and `splice(2)`)
//! - [`upstream`]: Upstream tunnel dialers

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod intercept;
pub mod io;
pub mod upstream;

// Re-export commonly used types at the crate root
pub use config::{Config, ListenConfig, LogConfig, RelayConfig, UpstreamConfig};
pub use connection::{ConnectionStats, HandlerContext, ListenerState, ShutdownHandle, Supervisor};
pub use error::{ConfigError, ConnectionError, DialError, ListenError, RelayError, ResolveError};
pub use intercept::{InterceptListener, OriginalDstResolver, ResolvedDestination};
pub use io::CopyStrategy;
pub use upstream::{dialer_from_url, Dialer, UpstreamConnection};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
