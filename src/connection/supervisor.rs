//! Listener lifecycle supervisor
//!
//! Owns the accept loop and spawns one handler per accepted connection.
//!
//! ```text
//! Running --shutdown()--> ShuttingDown --accept loop exits--> Stopped
//! ```
//!
//! Shutdown only stops accepting. Handlers already running are left to
//! finish on their own; [`Supervisor::wait_idle`] resolves once they have.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, Instrument};

use super::handler::{handle_connection, HandlerContext};
use super::stats::ConnectionStats;
use crate::intercept::InterceptListener;

/// Listener lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Accepting connections
    Running,
    /// Stop requested; the accept loop is exiting
    ShuttingDown,
    /// Listener closed and accept loop exited
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Cloneable handle that requests shutdown of a [`Supervisor`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    state: Arc<watch::Sender<ListenerState>>,
}

impl ShutdownHandle {
    /// Request shutdown. Returns `true` if this call moved the listener out
    /// of `Running`; later calls are no-ops.
    pub fn shutdown(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ListenerState::Running {
                *state = ListenerState::ShuttingDown;
                true
            } else {
                false
            }
        })
    }

    /// Current listener state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }
}

#[derive(Debug, Default)]
struct Shared {
    stats: ConnectionStats,
    idle: Notify,
}

/// Decrements the active count when a handler task ends, even on panic
struct ActiveGuard {
    shared: Arc<Shared>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.shared.stats.record_released() == 0 {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Accept loop and handler bookkeeping
#[derive(Debug)]
pub struct Supervisor {
    ctx: Arc<HandlerContext>,
    shared: Arc<Shared>,
    state: Arc<watch::Sender<ListenerState>>,
}

impl Supervisor {
    /// Create a supervisor in the `Running` state
    #[must_use]
    pub fn new(ctx: HandlerContext) -> Self {
        let (state, _) = watch::channel(ListenerState::Running);
        Self {
            ctx: Arc::new(ctx),
            shared: Arc::new(Shared::default()),
            state: Arc::new(state),
        }
    }

    /// Handle used to request shutdown from another task
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Current listener state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Watch listener state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Connection statistics
    #[must_use]
    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    /// Handlers currently running
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.shared.stats.active()
    }

    /// Run the accept loop until shutdown is requested.
    ///
    /// Accept errors while running are logged and the loop continues. Once
    /// shutdown is requested the loop exits without reporting them, the
    /// listener is closed and the state becomes `Stopped`.
    pub async fn run(&self, listener: InterceptListener) {
        let mut state_rx = self.state.subscribe();

        info!(
            "Accepting redirected connections on {} (resolver={}, dialer={}, copy={})",
            listener.local_addr(),
            self.ctx.resolver.name(),
            self.ctx.dialer.kind(),
            self.ctx.copy_strategy
        );

        loop {
            tokio::select! {
                biased;
                _ = state_rx.wait_for(|state| *state != ListenerState::Running) => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => self.spawn_handler(conn),
                    Err(e) => {
                        if *self.state.borrow() == ListenerState::Running {
                            error!("Accept error on {}: {}", listener.local_addr(), e);
                        } else {
                            break;
                        }
                    }
                },
            }
        }

        let addr = listener.local_addr();
        drop(listener);
        self.state.send_replace(ListenerState::Stopped);
        info!(
            "Listener on {} closed, {} connection(s) still active",
            addr,
            self.active_connections()
        );
    }

    fn spawn_handler(&self, conn: crate::intercept::InterceptedConnection) {
        self.shared.stats.record_accepted();
        let guard = ActiveGuard {
            shared: Arc::clone(&self.shared),
        };

        let span = tracing::info_span!(
            "conn",
            client = %conn.client_addr(),
            dst = tracing::field::Empty,
        );

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(
            async move {
                let outcome = handle_connection(conn, &ctx).await;
                guard.shared.stats.record_outcome(&outcome);
                drop(guard);
            }
            .instrument(span),
        );
    }

    /// Wait until no handler is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let active = self.active_connections();
            if active == 0 {
                return;
            }
            debug!("Waiting for {} connection(s) to drain", active);
            notified.await;
        }
    }
}
