//! Low-level socket operations for NAT-redirected connections
//!
//! Key capabilities:
//! - `SO_ORIGINAL_DST` / `IP6T_SO_ORIGINAL_DST`: read the pre-NAT destination
//!   that netfilter conntrack recorded for a `REDIRECT`/`DNAT`ed connection
//! - Listener socket creation (`SO_REUSEADDR`, dual-stack, backlog)
//! - Per-stream transport tuning (keep-alive, `TCP_NODELAY`)

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ListenError, ResolveError};

/// Linux kernel constant: `SO_ORIGINAL_DST` (`SOL_IP` level), from
/// `linux/netfilter_ipv4.h`.
pub const SO_ORIGINAL_DST: libc::c_int = 80;

/// Linux kernel constant: `IP6T_SO_ORIGINAL_DST` (`SOL_IPV6` level), from
/// `linux/netfilter_ipv6/ip6_tables.h`.
pub const IP6T_SO_ORIGINAL_DST: libc::c_int = 80;

/// Keep-alive idle time and retransmit interval applied to both relay streams
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Address family used to pick the conntrack query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// `AF_INET`, queried with `SO_ORIGINAL_DST`
    V4,
    /// `AF_INET6`, queried with `IP6T_SO_ORIGINAL_DST`
    V6,
}

impl AddressFamily {
    /// Family of a connection judged from its locally-bound address.
    ///
    /// A dual-stack listener reports IPv4 clients as IPv4-mapped IPv6
    /// addresses; conntrack tracks those flows as IPv4, so they count as V4.
    #[must_use]
    pub fn of_local(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::V4,
            SocketAddr::V6(v6) if v6.ip().to_ipv4_mapped().is_some() => Self::V4,
            SocketAddr::V6(_) => Self::V6,
        }
    }

    /// Name of the socket option used for this family
    #[must_use]
    pub const fn option_name(self) -> &'static str {
        match self {
            Self::V4 => "SO_ORIGINAL_DST",
            Self::V6 => "IP6T_SO_ORIGINAL_DST",
        }
    }
}

// =============================================================================
// Original Destination Query
// =============================================================================

/// Query netfilter conntrack for the original destination of `fd`.
///
/// # Errors
///
/// Returns `ResolveError::Query` if getsockopt fails (connection not
/// redirected, conntrack module not loaded, socket already closed) and
/// `ResolveError::UnexpectedFamily` if the kernel answers with a structure
/// of another family.
#[cfg(target_os = "linux")]
pub fn query_original_dst(
    fd: std::os::unix::io::RawFd,
    family: AddressFamily,
) -> Result<SocketAddr, ResolveError> {
    use std::mem;

    match family {
        AddressFamily::V4 => {
            let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
            let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

            let ret = unsafe {
                libc::getsockopt(
                    fd,
                    libc::SOL_IP,
                    SO_ORIGINAL_DST,
                    std::ptr::addr_of_mut!(addr).cast::<libc::c_void>(),
                    &raw mut len,
                )
            };

            if ret != 0 {
                return Err(ResolveError::Query {
                    option: family.option_name(),
                    source: io::Error::last_os_error(),
                });
            }

            decode_sockaddr_in(&addr)
        }
        AddressFamily::V6 => {
            let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            let mut len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;

            let ret = unsafe {
                libc::getsockopt(
                    fd,
                    libc::SOL_IPV6,
                    IP6T_SO_ORIGINAL_DST,
                    std::ptr::addr_of_mut!(addr).cast::<libc::c_void>(),
                    &raw mut len,
                )
            };

            if ret != 0 {
                return Err(ResolveError::Query {
                    option: family.option_name(),
                    source: io::Error::last_os_error(),
                });
            }

            decode_sockaddr_in6(&addr)
        }
    }
}

/// Conntrack has no portable equivalent outside Linux.
///
/// # Errors
///
/// Always returns `ResolveError::Unsupported`.
#[cfg(not(target_os = "linux"))]
pub fn query_original_dst(
    _fd: std::os::unix::io::RawFd,
    _family: AddressFamily,
) -> Result<SocketAddr, ResolveError> {
    Err(ResolveError::Unsupported)
}

/// Decode the `sockaddr_in` filled in by `SO_ORIGINAL_DST`.
///
/// The port and address are stored in network byte order.
///
/// # Errors
///
/// Returns `ResolveError::UnexpectedFamily` if `sin_family` is not `AF_INET`.
pub fn decode_sockaddr_in(addr: &libc::sockaddr_in) -> Result<SocketAddr, ResolveError> {
    if libc::c_int::from(addr.sin_family) != libc::AF_INET {
        return Err(ResolveError::UnexpectedFamily {
            option: AddressFamily::V4.option_name(),
            family: libc::c_int::from(addr.sin_family),
        });
    }

    let port = u16::from_be(addr.sin_port);
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));

    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// Decode the `sockaddr_in6` filled in by `IP6T_SO_ORIGINAL_DST`.
///
/// # Errors
///
/// Returns `ResolveError::UnexpectedFamily` if `sin6_family` is not `AF_INET6`.
pub fn decode_sockaddr_in6(addr: &libc::sockaddr_in6) -> Result<SocketAddr, ResolveError> {
    if libc::c_int::from(addr.sin6_family) != libc::AF_INET6 {
        return Err(ResolveError::UnexpectedFamily {
            option: AddressFamily::V6.option_name(),
            family: libc::c_int::from(addr.sin6_family),
        });
    }

    let port = u16::from_be(addr.sin6_port);
    let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);

    Ok(SocketAddr::V6(SocketAddrV6::new(
        ip,
        port,
        addr.sin6_flowinfo,
        addr.sin6_scope_id,
    )))
}

// =============================================================================
// Listener Socket
// =============================================================================

/// Create a bound, listening, non-blocking TCP socket.
///
/// With `dual_stack` set and an IPv6 address, `IPV6_V6ONLY` is cleared so
/// IPv4 clients are accepted as IPv4-mapped peers.
///
/// # Errors
///
/// Returns `ListenError` if socket creation, an option, bind or listen fails.
pub fn create_listener_socket(
    addr: SocketAddr,
    dual_stack: bool,
    backlog: u32,
) -> Result<std::net::TcpListener, ListenError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ListenError::SocketCreation(e.to_string()))?;

    if addr.is_ipv6() {
        socket
            .set_only_v6(!dual_stack)
            .map_err(|e| ListenError::socket_option("IPV6_V6ONLY", e.to_string()))?;
    }

    // Quick restart while old connections sit in TIME_WAIT
    socket
        .set_reuse_address(true)
        .map_err(|e| ListenError::socket_option("SO_REUSEADDR", e.to_string()))?;

    socket
        .bind(&addr.into())
        .map_err(|e| ListenError::bind(addr, e.to_string()))?;

    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    socket
        .listen(backlog)
        .map_err(|e| ListenError::socket_option("listen", e.to_string()))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| ListenError::socket_option("O_NONBLOCK", e.to_string()))?;

    debug!(
        "Created listener socket on {} (dual_stack={}, backlog={})",
        addr, dual_stack, backlog
    );

    Ok(socket.into())
}

// =============================================================================
// Transport Tuning
// =============================================================================

/// Tune a relay stream for interactive traffic.
///
/// Enables keep-alive (idle time and retransmit interval of [`KEEPALIVE_INTERVAL`])
/// and disables Nagle's algorithm.
///
/// # Errors
///
/// Returns the first failing setsockopt error.
pub fn tune_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_INTERVAL)
        .with_interval(KEEPALIVE_INTERVAL);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
