//! Per-connection handling
//!
//! One handler drives one intercepted connection through its whole life:
//!
//! 1. Tune the client socket (keep-alive, `TCP_NODELAY`)
//! 2. Resolve the original destination
//! 3. Dial the upstream tunnel to it
//! 4. Tune the upstream socket
//! 5. Relay both directions until the first one ends, then tear both down
//!
//! Nothing is retried. A failure ends this connection only.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::ConnectionError;
use crate::intercept::{tune_stream, InterceptedConnection, OriginalDstResolver, ResolvedDestination};
use crate::io::{relay_one_way, CopyResult, CopyStrategy};
use crate::upstream::Dialer;

/// Read-only collaborators shared by every handler
#[derive(Clone)]
pub struct HandlerContext {
    /// Original destination lookup
    pub resolver: Arc<dyn OriginalDstResolver>,
    /// Upstream tunnel dialer
    pub dialer: Arc<dyn Dialer>,
    /// Relay loop implementation
    pub copy_strategy: CopyStrategy,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("resolver", &self.resolver.name())
            .field("dialer", &self.dialer.kind())
            .field("copy_strategy", &self.copy_strategy)
            .finish()
    }
}

/// How a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResult {
    /// Both streams were paired and relayed until teardown
    Relayed {
        /// Bytes moved in each direction
        copy: CopyResult,
        /// Error of the direction that ended first, if it failed
        error: Option<String>,
    },
    /// The original destination could not be determined; nothing was dialed
    ResolveFailed { reason: String },
    /// The upstream tunnel could not be opened
    DialFailed { reason: String },
}

/// Result of handling one connection
#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    /// Client address
    pub client: SocketAddr,
    /// Resolved original destination, if resolution succeeded
    pub destination: Option<ResolvedDestination>,
    /// What happened
    pub result: ConnectionResult,
}

/// Handle one intercepted connection to completion.
///
/// Both sockets are closed when this returns, on every path.
pub async fn handle_connection(
    conn: InterceptedConnection,
    ctx: &HandlerContext,
) -> ConnectionOutcome {
    let client = conn.client_addr();
    let accepted_at = conn.accepted_at();

    if let Err(e) = tune_stream(conn.stream()) {
        debug!("Failed to tune client socket {}: {}", client, e);
    }

    let destination = match conn.resolve(ctx.resolver.as_ref()) {
        Ok(dst) => dst,
        Err(e) => {
            if e.is_not_redirected() {
                error!(
                    "No NAT mapping for {} (not redirected, or conntrack unavailable): {}",
                    client, e
                );
            } else {
                error!("Failed to resolve original destination for {}: {}", client, e);
            }
            return ConnectionOutcome {
                client,
                destination: None,
                result: ConnectionResult::ResolveFailed {
                    reason: e.to_string(),
                },
            };
        }
    };

    tracing::Span::current().record("dst", tracing::field::display(destination.addr));
    info!(
        "{} -> {} ({}) via {}",
        client,
        destination.addr,
        destination.source,
        ctx.dialer.kind()
    );

    let upstream = match ctx.dialer.dial(destination.addr).await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("Failed to open tunnel to {} for {}: {}", destination.addr, client, e);
            return ConnectionOutcome {
                client,
                destination: Some(destination),
                result: ConnectionResult::DialFailed {
                    reason: e.to_string(),
                },
            };
        }
    };

    let upstream = upstream.into_stream();
    if let Err(e) = tune_stream(&upstream) {
        debug!("Failed to tune upstream socket for {}: {}", destination.addr, e);
    }

    let summary = relay_pair(conn.into_stream(), upstream, ctx.copy_strategy).await;

    debug!(
        "Connection closed: {} -> {}, {} up / {} down bytes in {:?}",
        client,
        destination.addr,
        summary.copy.client_to_upstream,
        summary.copy.upstream_to_client,
        accepted_at.elapsed()
    );

    ConnectionOutcome {
        client,
        destination: Some(destination),
        result: ConnectionResult::Relayed {
            copy: summary.copy,
            error: summary.error.map(|e| e.to_string()),
        },
    }
}

// =============================================================================
// Relay Pair
// =============================================================================

/// Relay direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Intercepted client -> upstream tunnel
    ClientToUpstream,
    /// Upstream tunnel -> intercepted client
    UpstreamToClient,
}

impl Direction {
    /// Name used in logs and errors
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientToUpstream => "client->upstream",
            Self::UpstreamToClient => "upstream->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly-once teardown shared by the two directions of a relay pair.
///
/// The first direction to finish wins; it cancels the other, whose copy
/// future is dropped wherever it is blocked.
#[derive(Debug, Default)]
pub struct CloseCoordinator {
    ended: AtomicBool,
    token: CancellationToken,
}

impl CloseCoordinator {
    /// Create a coordinator for a new pair
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a direction as ended. Returns `true` only for the first call,
    /// which also triggers teardown of the pair.
    pub fn finish(&self) -> bool {
        let first = !self.ended.swap(true, Ordering::AcqRel);
        if first {
            self.token.cancel();
        }
        first
    }

    /// Whether teardown has started
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Resolves once teardown has started
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// Totals of a finished relay pair
#[derive(Debug)]
pub struct RelaySummary {
    /// Bytes moved in each direction
    pub copy: CopyResult,
    /// Error of the direction that ended first, if it failed
    pub error: Option<ConnectionError>,
}

#[derive(Debug)]
struct DirectionReport {
    bytes: u64,
    /// `None` if cancelled by the other direction
    result: Option<io::Result<()>>,
    first: bool,
}

async fn run_direction(
    direction: Direction,
    strategy: CopyStrategy,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    coordinator: Arc<CloseCoordinator>,
) -> DirectionReport {
    let mut bytes = 0u64;

    let result = tokio::select! {
        biased;
        result = relay_one_way(strategy, &mut reader, &mut writer, &mut bytes) => Some(result),
        () = coordinator.closed() => None,
    };

    let first = coordinator.finish();

    // Each socket closes once both of its halves are gone
    drop(reader);
    drop(writer);

    if let Some(Err(e)) = &result {
        if !first {
            debug!("Relay {} ended during teardown: {}", direction, e);
        }
    }

    DirectionReport {
        bytes,
        result,
        first,
    }
}

/// Relay `client` and `upstream` in both directions.
///
/// Each direction runs in its own task and exclusively owns one read half
/// and one write half. When the first direction ends, cleanly or not, the
/// other is cancelled and both sockets are closed.
pub async fn relay_pair(client: TcpStream, upstream: TcpStream, strategy: CopyStrategy) -> RelaySummary {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();
    let coordinator = Arc::new(CloseCoordinator::new());

    let forward = tokio::spawn(run_direction(
        Direction::ClientToUpstream,
        strategy,
        client_read,
        upstream_write,
        Arc::clone(&coordinator),
    ));
    let reverse = tokio::spawn(run_direction(
        Direction::UpstreamToClient,
        strategy,
        upstream_read,
        client_write,
        Arc::clone(&coordinator),
    ));

    // A task that panicked never reaches finish(); close for it
    let (forward, reverse) = tokio::join!(
        async {
            let report = forward.await;
            coordinator.finish();
            report
        },
        async {
            let report = reverse.await;
            coordinator.finish();
            report
        },
    );

    let mut copy = CopyResult::default();
    let mut first_error = None;

    for (direction, joined) in [
        (Direction::ClientToUpstream, forward),
        (Direction::UpstreamToClient, reverse),
    ] {
        match joined {
            Ok(report) => {
                match direction {
                    Direction::ClientToUpstream => copy.client_to_upstream = report.bytes,
                    Direction::UpstreamToClient => copy.upstream_to_client = report.bytes,
                }
                if let (true, Some(Err(e))) = (report.first, report.result) {
                    error!("Relay {} failed: {}", direction, e);
                    first_error = Some(ConnectionError::Transfer {
                        direction: direction.as_str(),
                        source: e,
                    });
                }
            }
            Err(e) => {
                error!("Relay task {} did not complete: {}", direction, e);
                first_error.get_or_insert(ConnectionError::TaskFailed {
                    direction: direction.as_str(),
                    reason: e.to_string(),
                });
            }
        }
    }

    RelaySummary {
        copy,
        error: first_error,
    }
}
