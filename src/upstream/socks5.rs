//! SOCKS5 dialer
//!
//! Opens the upstream tunnel through a SOCKS5 proxy. The handshake itself
//! (RFC 1928, plus RFC 1929 username/password when credentials are given)
//! is delegated to `tokio-socks`; this type only adapts it to [`Dialer`].

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, trace};

use super::traits::{Dialer, UpstreamConnection};
use crate::error::DialError;

/// Default SOCKS5 proxy port
pub const DEFAULT_SOCKS5_PORT: u16 = 1080;

/// Username/password credentials for the proxy
#[derive(Clone, PartialEq, Eq)]
pub struct Socks5Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Socks5Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socks5Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Dialer that tunnels through a SOCKS5 proxy
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    /// Proxy endpoint as `host:port`
    proxy_addr: String,
    credentials: Option<Socks5Credentials>,
    /// Bound on connect plus handshake
    connect_timeout: Duration,
}

impl Socks5Dialer {
    /// Create a SOCKS5 dialer
    #[must_use]
    pub fn new(
        proxy_addr: impl Into<String>,
        credentials: Option<Socks5Credentials>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            credentials,
            connect_timeout,
        }
    }

    fn map_error(&self, dst: SocketAddr, err: tokio_socks::Error) -> DialError {
        match err {
            tokio_socks::Error::Io(e) => DialError::connect_failed(&self.proxy_addr, e.to_string()),
            tokio_socks::Error::ProxyServerUnreachable => {
                DialError::connect_failed(&self.proxy_addr, "proxy server unreachable")
            }
            other => DialError::Proxy {
                proxy: self.proxy_addr.clone(),
                addr: dst,
                reason: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(&self, dst: SocketAddr) -> Result<UpstreamConnection, DialError> {
        trace!("SOCKS5 dialing {} via {}", dst, self.proxy_addr);

        let handshake = async {
            match &self.credentials {
                Some(creds) => {
                    Socks5Stream::connect_with_password(
                        self.proxy_addr.as_str(),
                        dst,
                        &creds.username,
                        &creds.password,
                    )
                    .await
                }
                None => Socks5Stream::connect(self.proxy_addr.as_str(), dst).await,
            }
        };

        let socks_stream = timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| DialError::Timeout {
                addr: dst,
                timeout_secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|e| self.map_error(dst, e))?;

        debug!("SOCKS5 tunnel to {} established via {}", dst, self.proxy_addr);
        Ok(UpstreamConnection::new(socks_stream.into_inner(), dst))
    }

    fn kind(&self) -> &str {
        "socks5"
    }
}
