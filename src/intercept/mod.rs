//! Interception of NAT-redirected TCP connections
//!
//! The relay sits behind a netfilter `REDIRECT` rule. The kernel rewrites the
//! destination of matching connections to the relay's listen port and keeps
//! the original destination in its connection tracking table, where the
//! [`ConntrackResolver`] reads it back.
//!
//! # Example iptables Setup
//!
//! ```bash
//! # Send outbound TCP from the LAN through the relay on port 9040
//! iptables -t nat -A PREROUTING -i br-lan -p tcp -j REDIRECT --to-ports 9040
//!
//! # Locally generated traffic, skipping the relay's own upstream connections
//! iptables -t nat -A OUTPUT -p tcp -m owner ! --uid-owner relay -j REDIRECT --to-ports 9040
//!
//! # IPv6
//! ip6tables -t nat -A PREROUTING -i br-lan -p tcp -j REDIRECT --to-ports 9040
//! ```
//!
//! # Requirements
//!
//! - Linux with `nf_conntrack` and `nf_nat` (the `iptable_nat` / `ip6table_nat` tables)
//! - Traffic to the upstream proxy itself must be excluded from the redirect,
//!   otherwise the relay loops into itself

mod connection;
mod listener;
mod resolver;
mod socket;

pub use connection::InterceptedConnection;
pub use listener::{parse_listen_addr, InterceptListener, ListenAddr};
pub use resolver::{
    default_resolver, ConntrackResolver, DestinationSource, LocalAddrResolver,
    OriginalDstResolver, ResolvedDestination, ResolverKind,
};
pub use socket::{
    create_listener_socket, decode_sockaddr_in, decode_sockaddr_in6, query_original_dst,
    tune_stream, AddressFamily, IP6T_SO_ORIGINAL_DST, KEEPALIVE_INTERVAL, SO_ORIGINAL_DST,
};
