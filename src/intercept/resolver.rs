//! Original destination resolution
//!
//! A resolver answers one question for an accepted connection: where was the
//! client trying to go before the NAT rule rewrote the destination?
//!
//! [`ConntrackResolver`] asks the kernel. It works on a duplicated descriptor
//! so the caller's stream is never touched; the duplicate is released when
//! the lookup returns, whatever the outcome.

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::socket::{query_original_dst, AddressFamily};
use crate::error::ResolveError;

/// Where a resolved destination came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationSource {
    /// Recovered from the kernel's NAT connection tracking table
    Conntrack,
    /// The connection's own local address (no NAT lookup performed)
    LocalFallback,
}

impl fmt::Display for DestinationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conntrack => write!(f, "conntrack"),
            Self::LocalFallback => write!(f, "local"),
        }
    }
}

/// Destination a client originally addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDestination {
    /// The pre-NAT destination
    pub addr: SocketAddr,
    /// How it was obtained
    pub source: DestinationSource,
}

impl ResolvedDestination {
    /// Destination recovered from conntrack
    #[must_use]
    pub const fn conntrack(addr: SocketAddr) -> Self {
        Self {
            addr,
            source: DestinationSource::Conntrack,
        }
    }
}

/// Capability that maps an accepted stream to its original destination.
///
/// Implementations must not close, shut down, or change the blocking mode
/// of the stream they are given.
pub trait OriginalDstResolver: Send + Sync + fmt::Debug {
    /// Resolve the original destination of `stream`.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError` if no destination can be determined. The caller
    /// must then close the connection without dialing upstream.
    fn resolve(&self, stream: &TcpStream) -> Result<ResolvedDestination, ResolveError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Which resolver to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Query NAT connection tracking (`SO_ORIGINAL_DST`)
    #[default]
    Conntrack,
    /// Use the accepted socket's local address (for DNAT-to-self setups and testing)
    Local,
}

impl fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conntrack => write!(f, "conntrack"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for ResolverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conntrack" => Ok(Self::Conntrack),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown resolver '{other}' (expected conntrack or local)")),
        }
    }
}

/// Build the resolver selected by `kind`
#[must_use]
pub fn default_resolver(kind: ResolverKind) -> Arc<dyn OriginalDstResolver> {
    match kind {
        ResolverKind::Conntrack => Arc::new(ConntrackResolver::new()),
        ResolverKind::Local => Arc::new(LocalAddrResolver),
    }
}

// =============================================================================
// Conntrack Resolver
// =============================================================================

/// Resolver backed by the kernel's NAT connection tracking
#[derive(Debug, Default, Clone, Copy)]
pub struct ConntrackResolver;

impl ConntrackResolver {
    /// Create a new conntrack resolver
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl OriginalDstResolver for ConntrackResolver {
    fn resolve(&self, stream: &TcpStream) -> Result<ResolvedDestination, ResolveError> {
        use std::os::unix::io::AsRawFd;

        let local = stream.local_addr().map_err(ResolveError::LocalAddr)?;
        let family = AddressFamily::of_local(&local);

        let exported = ExportedSocket::from_stream(stream)?;
        let addr = query_original_dst(exported.socket.as_raw_fd(), family)?;

        debug!(
            "Resolved original destination {} via {} (local {})",
            addr,
            family.option_name(),
            local
        );

        Ok(ResolvedDestination::conntrack(addr))
    }

    fn name(&self) -> &'static str {
        "conntrack"
    }
}

/// A duplicate of a stream's descriptor, closed on drop.
///
/// The duplicate shares the open file description with the original. The
/// blocking-mode flag lives there too, so the duplicate is explicitly put
/// into non-blocking mode to keep the runtime-owned original non-blocking.
struct ExportedSocket {
    socket: socket2::Socket,
}

impl ExportedSocket {
    fn from_stream(stream: &TcpStream) -> Result<Self, ResolveError> {
        let fd = stream
            .as_fd()
            .try_clone_to_owned()
            .map_err(ResolveError::Export)?;
        let socket = socket2::Socket::from(fd);

        socket
            .set_nonblocking(true)
            .map_err(ResolveError::NonBlocking)?;

        Ok(Self { socket })
    }
}

impl Drop for ExportedSocket {
    fn drop(&mut self) {
        trace!("Releasing exported descriptor");
    }
}

// =============================================================================
// Local Address Resolver
// =============================================================================

/// Resolver that reports the accepted socket's local address.
///
/// With `DNAT` to the relay's own address this is never the real target;
/// it exists for setups where the listener is addressed directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalAddrResolver;

impl OriginalDstResolver for LocalAddrResolver {
    fn resolve(&self, stream: &TcpStream) -> Result<ResolvedDestination, ResolveError> {
        let addr = stream.local_addr().map_err(ResolveError::LocalAddr)?;
        Ok(ResolvedDestination {
            addr,
            source: DestinationSource::LocalFallback,
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
