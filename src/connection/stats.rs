//! Connection statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::handler::{ConnectionOutcome, ConnectionResult};

/// Atomic connection statistics shared by all handlers
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted
    accepted: AtomicU64,
    /// Handlers currently running
    active: AtomicU64,
    /// Connections that reached the relay stage and finished
    completed: AtomicU64,
    /// Connections dropped because no original destination was found
    resolve_failed: AtomicU64,
    /// Connections dropped because the upstream tunnel could not be opened
    dial_failed: AtomicU64,
    /// Relayed connections that ended on an I/O error
    relay_errors: AtomicU64,
    /// Total bytes client -> upstream
    bytes_client_to_upstream: AtomicU64,
    /// Total bytes upstream -> client
    bytes_upstream_to_client: AtomicU64,
}

impl ConnectionStats {
    /// Create new connection statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new accepted connection
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    /// Record that a handler exited. Returns the number still active.
    pub fn record_released(&self) -> u64 {
        self.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    /// Record how a handler finished
    pub fn record_outcome(&self, outcome: &ConnectionOutcome) {
        match &outcome.result {
            ConnectionResult::Relayed { copy, error } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.bytes_client_to_upstream
                    .fetch_add(copy.client_to_upstream, Ordering::Relaxed);
                self.bytes_upstream_to_client
                    .fetch_add(copy.upstream_to_client, Ordering::Relaxed);
                if error.is_some() {
                    self.relay_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            ConnectionResult::ResolveFailed { .. } => {
                self.resolve_failed.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionResult::DialFailed { .. } => {
                self.dial_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get total accepted connections
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Get currently active connections
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Get completed connections
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get connections dropped on resolution failure
    #[must_use]
    pub fn resolve_failed(&self) -> u64 {
        self.resolve_failed.load(Ordering::Relaxed)
    }

    /// Get connections dropped on dial failure
    #[must_use]
    pub fn dial_failed(&self) -> u64 {
        self.dial_failed.load(Ordering::Relaxed)
    }

    /// Get relayed connections that ended on an error
    #[must_use]
    pub fn relay_errors(&self) -> u64 {
        self.relay_errors.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted(),
            active: self.active(),
            completed: self.completed(),
            resolve_failed: self.resolve_failed(),
            dial_failed: self.dial_failed(),
            relay_errors: self.relay_errors(),
            bytes_client_to_upstream: self.bytes_client_to_upstream.load(Ordering::Relaxed),
            bytes_upstream_to_client: self.bytes_upstream_to_client.load(Ordering::Relaxed),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Snapshot of connection statistics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total connections accepted
    pub accepted: u64,
    /// Currently active connections
    pub active: u64,
    /// Relayed connections that finished
    pub completed: u64,
    /// Connections dropped on resolution failure
    pub resolve_failed: u64,
    /// Connections dropped on dial failure
    pub dial_failed: u64,
    /// Relayed connections that ended on an error
    pub relay_errors: u64,
    /// Total bytes client -> upstream
    pub bytes_client_to_upstream: u64,
    /// Total bytes upstream -> client
    pub bytes_upstream_to_client: u64,
    /// Timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl StatsSnapshot {
    /// Get total bytes transferred (both directions)
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_client_to_upstream + self.bytes_upstream_to_client
    }

    /// Connections that ended before any relaying
    #[must_use]
    pub const fn failed(&self) -> u64 {
        self.resolve_failed + self.dial_failed
    }
}
