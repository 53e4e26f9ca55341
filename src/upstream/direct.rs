//! Direct dialer
//!
//! Connects straight to the destination with no tunnel. Selected with a
//! `direct://` upstream URL.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::traits::{Dialer, UpstreamConnection};
use crate::error::DialError;

/// Dialer that connects to the destination itself
#[derive(Debug, Clone)]
pub struct DirectDialer {
    connect_timeout: Duration,
}

impl DirectDialer {
    /// Create a direct dialer with the given connect timeout
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, dst: SocketAddr) -> Result<UpstreamConnection, DialError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(dst))
            .await
            .map_err(|_| DialError::Timeout {
                addr: dst,
                timeout_secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|e| DialError::connect_failed(dst.to_string(), e.to_string()))?;

        debug!("Direct connection established to {}", dst);
        Ok(UpstreamConnection::new(stream, dst))
    }

    fn kind(&self) -> &str {
        "direct"
    }
}
