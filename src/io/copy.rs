//! One-directional relay loop for TCP streams
//!
//! A relay pair runs two instances of the loop, one per direction, each with
//! its own buffer. Within one direction the loop is strictly sequential: a
//! chunk is fully written before the next read is issued.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::trace;

/// Size of the per-direction relay buffer (32 KiB)
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// How a relay direction moves bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStrategy {
    /// Kernel zero-copy through a pipe (`splice(2)`), Linux only
    #[default]
    Splice,
    /// Read into a userspace buffer, then write it out
    Buffered,
}

impl fmt::Display for CopyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Splice => write!(f, "splice"),
            Self::Buffered => write!(f, "buffered"),
        }
    }
}

impl std::str::FromStr for CopyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "splice" => Ok(Self::Splice),
            "buffered" => Ok(Self::Buffered),
            other => Err(format!("unknown copy strategy '{other}' (expected splice or buffered)")),
        }
    }
}

/// Result of one relay direction
#[derive(Debug)]
pub struct CopyOutcome {
    /// Bytes written to the destination before the loop ended
    pub bytes: u64,
    /// `Ok` on clean end-of-stream, otherwise the read or write error
    pub result: io::Result<()>,
}

impl CopyOutcome {
    /// Whether the direction ended on end-of-stream
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.result.is_ok()
    }
}

/// Byte totals for a finished relay pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResult {
    /// Bytes transferred from client to upstream
    pub client_to_upstream: u64,
    /// Bytes transferred from upstream to client
    pub upstream_to_client: u64,
}

impl CopyResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }
}

/// Copy from `reader` to `writer` until end-of-stream or an error.
///
/// Every successful read is written out in full before the next read. If a
/// write fails, the chunk being written is dropped and the loop ends with
/// that error; there is no retry.
pub async fn copy_buffered<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> CopyOutcome
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut bytes = 0u64;
    let result = buffered_loop(reader, writer, buf, &mut bytes).await;
    CopyOutcome { bytes, result }
}

/// Buffered loop body. `bytes` counts fully written chunks and stays
/// accurate if the future is dropped mid-copy.
pub(super) async fn buffered_loop<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    bytes: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        let n = match reader.read(buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        writer.write_all(&buf[..n]).await?;
        *bytes += n as u64;
    }

    trace!("Relay direction reached end-of-stream after {} bytes", bytes);

    // Propagate the half-close so the peer sees EOF too
    writer.shutdown().await
}

/// Run one relay direction between two owned TCP halves with `strategy`.
///
/// Bytes delivered so far are added to `bytes` as the copy progresses, so
/// the count survives cancellation of this future.
///
/// # Errors
///
/// Returns the read or write error that ended the direction.
pub async fn relay_one_way(
    strategy: CopyStrategy,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    bytes: &mut u64,
) -> io::Result<()> {
    match strategy {
        #[cfg(target_os = "linux")]
        CopyStrategy::Splice => super::splice::splice_loop(reader, writer, bytes).await,
        #[cfg(not(target_os = "linux"))]
        CopyStrategy::Splice => {
            let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
            buffered_loop(reader, writer, &mut buf, bytes).await
        }
        CopyStrategy::Buffered => {
            let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
            buffered_loop(reader, writer, &mut buf, bytes).await
        }
    }
}
