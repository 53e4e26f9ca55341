//! Connection handling module
//!
//! This module provides:
//! - Per-connection handling (resolve, dial, relay, teardown)
//! - The accept loop with graceful shutdown
//! - Statistics collection

mod handler;
mod stats;
mod supervisor;

pub use handler::{
    handle_connection, relay_pair, CloseCoordinator, ConnectionOutcome, ConnectionResult,
    Direction, HandlerContext, RelaySummary,
};
pub use stats::{ConnectionStats, StatsSnapshot};
pub use supervisor::{ListenerState, ShutdownHandle, Supervisor};
