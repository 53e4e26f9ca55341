//! Zero-copy relay direction using `splice(2)`
//!
//! Bytes move socket -> pipe -> socket without passing through userspace.
//! The pipe is drained completely before the next read, so ordering and
//! partial-read handling match the buffered loop.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::trace;

use super::copy::{CopyOutcome, RELAY_BUFFER_SIZE};

/// An anonymous pipe used as the in-kernel relay buffer
#[derive(Debug)]
struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];

        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        // Safety: pipe2 succeeded, both descriptors are fresh and owned here
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        // Best effort; the default pipe size is already large enough
        let size = libc::c_int::try_from(RELAY_BUFFER_SIZE).unwrap_or(libc::c_int::MAX);
        unsafe {
            libc::fcntl(write.as_raw_fd(), libc::F_SETPIPE_SZ, size);
        }

        Ok(Self { read, write })
    }
}

fn splice(fd_in: RawFd, fd_out: RawFd, len: usize) -> io::Result<usize> {
    let ret = unsafe {
        libc::splice(
            fd_in,
            std::ptr::null_mut(),
            fd_out,
            std::ptr::null_mut(),
            len,
            libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK,
        )
    };

    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret.unsigned_abs())
    }
}

/// Move up to [`RELAY_BUFFER_SIZE`] bytes from the socket into the pipe.
/// Returns 0 on end-of-stream.
async fn fill_pipe(reader: &OwnedReadHalf, pipe: &Pipe) -> io::Result<usize> {
    let stream = reader.as_ref();
    let fd = stream.as_raw_fd();

    loop {
        stream.readable().await?;
        match stream.try_io(Interest::READABLE, || {
            splice(fd, pipe.write.as_raw_fd(), RELAY_BUFFER_SIZE)
        }) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Move exactly `len` bytes from the pipe into the socket.
async fn drain_pipe(writer: &OwnedWriteHalf, pipe: &Pipe, mut len: usize) -> io::Result<()> {
    let stream = writer.as_ref();
    let fd = stream.as_raw_fd();

    while len > 0 {
        stream.writable().await?;
        match stream.try_io(Interest::WRITABLE, || splice(pipe.read.as_raw_fd(), fd, len)) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero bytes"));
            }
            Ok(n) => len -= n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Copy from `reader` to `writer` with `splice(2)` until end-of-stream or
/// an error. On a write error the bytes left in the pipe are dropped.
pub async fn copy_splice(reader: &mut OwnedReadHalf, writer: &mut OwnedWriteHalf) -> CopyOutcome {
    let mut bytes = 0u64;
    let result = splice_loop(reader, writer, &mut bytes).await;
    CopyOutcome { bytes, result }
}

pub(super) async fn splice_loop(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    bytes: &mut u64,
) -> io::Result<()> {
    let pipe = Pipe::new()?;

    loop {
        let n = fill_pipe(reader, &pipe).await?;
        if n == 0 {
            break;
        }

        drain_pipe(writer, &pipe, n).await?;
        *bytes += n as u64;
    }

    trace!("Splice direction reached end-of-stream after {} bytes", bytes);

    writer.shutdown().await
}
