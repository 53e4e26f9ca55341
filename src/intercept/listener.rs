//! Listener for NAT-redirected TCP connections

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::connection::InterceptedConnection;
use super::socket::create_listener_socket;
use crate::config::ListenConfig;
use crate::error::{ConfigError, ListenError};

/// A parsed listen address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenAddr {
    /// Socket address to bind
    pub addr: SocketAddr,
    /// Accept IPv4 clients on an IPv6 wildcard socket
    pub dual_stack: bool,
}

/// Parse a listen address.
///
/// Accepted forms:
/// - `:9040` binds every interface (dual-stack `[::]`, falling back to `0.0.0.0`)
/// - `127.0.0.1:9040` or `[::1]:9040`
/// - `localhost:9040` (first resolved address)
///
/// # Errors
///
/// Returns `ConfigError::InvalidListenAddr` if the address cannot be parsed.
pub fn parse_listen_addr(input: &str) -> Result<ListenAddr, ConfigError> {
    let trimmed = input.trim();

    if let Some(port) = trimmed.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|e| ConfigError::listen_addr(input, format!("invalid port: {e}")))?;
        return Ok(ListenAddr {
            addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
            dual_stack: true,
        });
    }

    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return Ok(ListenAddr {
            addr,
            dual_stack: false,
        });
    }

    trimmed
        .to_socket_addrs()
        .map_err(|e| ConfigError::listen_addr(input, e.to_string()))?
        .next()
        .map(|addr| ListenAddr {
            addr,
            dual_stack: false,
        })
        .ok_or_else(|| ConfigError::listen_addr(input, "no addresses resolved"))
}

/// Listener that hands out [`InterceptedConnection`]s
#[derive(Debug)]
pub struct InterceptListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl InterceptListener {
    /// Create and bind a new listener.
    ///
    /// # Errors
    ///
    /// Returns `ListenError` if socket creation, binding or listening fails.
    pub fn bind(addr: ListenAddr, backlog: u32) -> Result<Self, ListenError> {
        info!("Creating intercept listener on {}", addr.addr);

        let std_listener = match create_listener_socket(addr.addr, addr.dual_stack, backlog) {
            Ok(listener) => listener,
            Err(e) if addr.dual_stack => {
                // Hosts with IPv6 disabled cannot open [::]
                warn!("Dual-stack bind on {} failed ({}), retrying on IPv4", addr.addr, e);
                let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, addr.addr.port()));
                create_listener_socket(v4, false, backlog)?
            }
            Err(e) => return Err(e),
        };

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ListenError::SocketCreation(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ListenError::SocketCreation(e.to_string()))?;

        info!("Intercept listener ready on {} (backlog={})", local_addr, backlog);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Bind from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or binding fails.
    pub fn from_config(config: &ListenConfig) -> crate::error::Result<Self> {
        let addr = parse_listen_addr(&config.address)?;
        Ok(Self::bind(addr, config.backlog)?)
    }

    /// Accept the next client.
    ///
    /// # Errors
    ///
    /// Returns the accept error. These are usually transient (`EMFILE`,
    /// `ECONNABORTED`) and the caller decides whether to continue.
    pub async fn accept(&self) -> std::io::Result<InterceptedConnection> {
        let (stream, client_addr) = self.listener.accept().await?;
        debug!("Accepted connection from {}", client_addr);
        Ok(InterceptedConnection::new(stream, client_addr))
    }

    /// Address the listener is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
