//! Upstream tunnel dialers
//!
//! The [`Dialer`] trait is the seam between the relay and whatever opens the
//! outbound tunnel. [`dialer_from_url`] builds one from the configured proxy
//! URL:
//!
//! | Scheme | Dialer |
//! |--------|--------|
//! | `socks5://[user:pass@]host[:port]` | [`Socks5Dialer`] (port defaults to 1080) |
//! | `socks5h://...` | [`Socks5Dialer`] (destinations are IPs, so identical to `socks5`) |
//! | `direct://` | [`DirectDialer`] |

mod direct;
mod socks5;
mod traits;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

pub use direct::DirectDialer;
pub use socks5::{Socks5Credentials, Socks5Dialer, DEFAULT_SOCKS5_PORT};
pub use traits::{Dialer, UpstreamConnection};

use crate::error::ConfigError;

/// Build a dialer from a proxy URL.
///
/// # Errors
///
/// Returns `ConfigError::InvalidProxyUrl` if the URL does not parse, uses an
/// unsupported scheme, or lacks a host.
pub fn dialer_from_url(
    proxy_url: &str,
    connect_timeout: Duration,
) -> Result<Arc<dyn Dialer>, ConfigError> {
    let invalid = |reason: String| ConfigError::proxy_url(redact_proxy_url(proxy_url), reason);

    let url = Url::parse(proxy_url).map_err(|e| invalid(e.to_string()))?;

    match url.scheme() {
        "socks5" | "socks5h" => {
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| invalid("missing host".into()))?;
            let port = url.port().unwrap_or(DEFAULT_SOCKS5_PORT);

            let credentials = if url.username().is_empty() {
                None
            } else {
                Some(Socks5Credentials {
                    username: url.username().to_string(),
                    password: url.password().unwrap_or_default().to_string(),
                })
            };

            Ok(Arc::new(Socks5Dialer::new(
                format!("{host}:{port}"),
                credentials,
                connect_timeout,
            )))
        }
        "direct" => Ok(Arc::new(DirectDialer::new(connect_timeout))),
        other => Err(invalid(format!(
            "unsupported scheme '{other}' (expected socks5, socks5h or direct)"
        ))),
    }
}

/// Proxy URL with any password replaced by `***`, for logs and errors.
#[must_use]
pub fn redact_proxy_url(proxy_url: &str) -> String {
    match Url::parse(proxy_url) {
        Ok(url) if url.password().is_none() => proxy_url.to_string(),
        Ok(mut url) => match url.set_password(Some("***")) {
            Ok(()) => url.to_string(),
            Err(()) => strip_userinfo(proxy_url),
        },
        Err(_) => strip_userinfo(proxy_url),
    }
}

fn strip_userinfo(proxy_url: &str) -> String {
    match proxy_url.rsplit_once('@') {
        Some((_, host)) => format!("***@{host}"),
        None => proxy_url.to_string(),
    }
}
