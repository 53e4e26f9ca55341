//! Accepted connection representation

use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;

use super::resolver::{OriginalDstResolver, ResolvedDestination};
use crate::error::ResolveError;

/// A client connection accepted from the intercept listener.
///
/// The destination is not known yet; call [`InterceptedConnection::resolve`]
/// to look it up.
#[derive(Debug)]
pub struct InterceptedConnection {
    /// The underlying TCP stream
    stream: TcpStream,

    /// Client's address (source)
    client_addr: SocketAddr,

    /// When the connection was accepted
    accepted_at: Instant,
}

impl InterceptedConnection {
    /// Wrap an accepted stream
    #[must_use]
    pub fn new(stream: TcpStream, client_addr: SocketAddr) -> Self {
        Self {
            stream,
            client_addr,
            accepted_at: Instant::now(),
        }
    }

    /// Resolve the original destination with `resolver`.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's error.
    pub fn resolve(
        &self,
        resolver: &dyn OriginalDstResolver,
    ) -> Result<ResolvedDestination, ResolveError> {
        resolver.resolve(&self.stream)
    }

    /// Get the underlying TCP stream
    #[must_use]
    pub const fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Consume the connection and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Get the client's source address
    #[must_use]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Get when the connection was accepted
    #[must_use]
    pub const fn accepted_at(&self) -> Instant {
        self.accepted_at
    }
}
