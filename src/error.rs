//! Error types for redir-relay
//!
//! Errors are grouped by subsystem. Only [`ConfigError`] and [`ListenError`]
//! are fatal to the process; everything else is scoped to a single
//! intercepted connection.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for process setup.
///
/// Per-connection failures never leave their handler, so only configuration
/// and listener errors surface here.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration errors (file parsing, validation, dialer construction)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener socket errors
    #[error("Listener error: {0}")]
    Listen(#[from] ListenError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Listen address could not be parsed
    #[error("Invalid listen address '{addr}': {reason}")]
    InvalidListenAddr { addr: String, reason: String },

    /// Proxy URL could not be turned into a dialer
    #[error("Invalid proxy URL '{url}': {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Create an invalid proxy URL error
    pub fn proxy_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProxyUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid listen address error
    pub fn listen_addr(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidListenAddr {
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

/// Listener socket errors (all fatal at startup)
#[derive(Debug, Error)]
pub enum ListenError {
    /// Failed to create socket
    #[error("Failed to create listener socket: {0}")]
    SocketCreation(String),

    /// Failed to set socket option
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },
}

impl ListenError {
    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Original destination resolution errors.
///
/// None of these are retryable for the connection that produced them.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The socket descriptor could not be duplicated
    #[error("Failed to export socket descriptor: {0}")]
    Export(io::Error),

    /// The exported descriptor could not be switched to non-blocking mode
    #[error("Failed to set non-blocking mode: {0}")]
    NonBlocking(io::Error),

    /// The local address of the connection is unavailable
    #[error("Failed to read local address: {0}")]
    LocalAddr(io::Error),

    /// The kernel rejected the original destination query
    #[error("getsockopt {option} failed: {source}")]
    Query {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    /// The kernel returned an address structure of an unexpected family
    #[error("Unexpected address family {family} returned by {option}")]
    UnexpectedFamily { option: &'static str, family: i32 },

    /// The platform has no NAT connection tracking query
    #[error("Original destination lookup is not supported on this platform")]
    Unsupported,
}

impl ResolveError {
    /// Whether the kernel indicated the connection was never NAT-redirected
    /// (or the conntrack module is not loaded).
    #[must_use]
    pub fn is_not_redirected(&self) -> bool {
        match self {
            Self::Query { source, .. } => matches!(
                source.raw_os_error(),
                Some(libc::ENOENT | libc::ENOPROTOOPT)
            ),
            _ => false,
        }
    }
}

/// Upstream tunnel errors
#[derive(Debug, Error)]
pub enum DialError {
    /// TCP connect to the proxy (or destination) failed
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// Connect plus handshake did not finish in time
    #[error("Dial to {addr} timed out after {timeout_secs}s")]
    Timeout { addr: SocketAddr, timeout_secs: u64 },

    /// The proxy refused or failed the negotiation
    #[error("Proxy {proxy} failed to open tunnel to {addr}: {reason}")]
    Proxy {
        proxy: String,
        addr: SocketAddr,
        reason: String,
    },
}

impl DialError {
    /// Create a connect failure
    pub fn connect_failed(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

/// Connection handling errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A relay direction failed mid-stream
    #[error("Relay {direction} failed: {source}")]
    Transfer {
        direction: &'static str,
        #[source]
        source: io::Error,
    },

    /// A relay task panicked or was aborted
    #[error("Relay task for {direction} did not complete: {reason}")]
    TaskFailed {
        direction: &'static str,
        reason: String,
    },
}

/// Type alias for Result with `RelayError`
pub type Result<T> = std::result::Result<T, RelayError>;
