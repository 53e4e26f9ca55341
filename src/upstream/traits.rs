//! Dialer trait definitions
//!
//! A dialer turns an original destination into a live stream that reaches
//! it, usually through a proxy tunnel. The relay never speaks a proxy
//! protocol itself; it only consumes this capability.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::DialError;

/// An established upstream tunnel
#[derive(Debug)]
pub struct UpstreamConnection {
    /// The underlying TCP stream (handshake already completed)
    stream: TcpStream,
    /// Local address of the connection
    local_addr: Option<SocketAddr>,
    /// Destination the tunnel leads to
    remote_addr: SocketAddr,
}

impl UpstreamConnection {
    /// Create a new upstream connection
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        let local_addr = stream.local_addr().ok();
        Self {
            stream,
            local_addr,
            remote_addr,
        }
    }

    /// Get the underlying stream
    #[must_use]
    pub const fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Consume and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Get the local address
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get the destination this tunnel reaches
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Capability that opens an upstream tunnel to a destination
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `dst`, completing any proxy handshake.
    ///
    /// # Errors
    ///
    /// Returns `DialError` if the connection or negotiation fails. Callers
    /// do not retry.
    async fn dial(&self, dst: SocketAddr) -> Result<UpstreamConnection, DialError>;

    /// Dialer type name used in logs (`socks5`, `direct`, ...)
    fn kind(&self) -> &str;
}
