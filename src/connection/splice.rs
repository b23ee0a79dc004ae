//! Kernel zero-copy fast path (Linux)
//!
//! Uses `splice(2)` to move bytes between the client and backend sockets
//! through a pipe, so player traffic never enters userspace buffers. Each
//! chunk is bounded to [`RATE_CHUNK`] bytes and tokens are acquired before
//! it moves, which keeps the rate limiter exact on this path too.
//! Accounting uses the byte counts the kernel reports per call.
//!
//! # Safety
//!
//! This module uses `unsafe` code to interface with libc. All unsafe blocks
//! are documented with their invariants.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::trace;

use crate::limiter::RATE_CHUNK;
use crate::state::{ConnectionEntry, GatewayState};

/// A non-blocking pipe owning both ends
struct Pipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Pipe {
    /// Create a non-blocking, close-on-exec pipe
    fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        // SAFETY: fds points to a valid array of two ints for pipe2 to fill.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        // SAFETY: both fds were returned by pipe2 and are owned by this
        // struct exclusively.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// One splice call moving up to `len` bytes between two fds
fn splice_fd(from: RawFd, to: RawFd, len: usize) -> io::Result<usize> {
    // SAFETY: both fds are open for the required direction; null offsets
    // are valid for sockets and pipes.
    let n = unsafe {
        libc::splice(
            from,
            std::ptr::null_mut(),
            to,
            std::ptr::null_mut(),
            len,
            libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

struct DirState {
    pipe: Pipe,
    read_done: bool,
}

/// What one pump pass observed on the source socket
enum Pump {
    Moved,
    Eof,
    NotReady,
}

/// Splice-based bidirectional relay
///
/// # Errors
///
/// Pipe setup failure maps to `ErrorKind::Unsupported` so the caller can
/// fall back to the metered path; anything else is a genuine transfer error
/// that closes the connection.
pub async fn relay(
    state: &Arc<GatewayState>,
    conn: &Arc<ConnectionEntry>,
    client: &TcpStream,
    backend: &TcpStream,
) -> io::Result<()> {
    let make_pipe = || {
        Pipe::new().map_err(|e| io::Error::new(io::ErrorKind::Unsupported, e))
    };
    let mut up = DirState {
        pipe: make_pipe()?,
        read_done: false,
    };
    let mut down = DirState {
        pipe: make_pipe()?,
        read_done: false,
    };
    trace!(conn = conn.id, "splice fast path engaged");

    while !(up.read_done && down.read_done) {
        tokio::select! {
            biased;
            () = conn.token.cancelled() => return Ok(()),
            r = client.readable(), if !up.read_done => {
                r?;
                if matches!(pump(state, conn, client, backend, &up.pipe, true).await?, Pump::Eof) {
                    up.read_done = true;
                }
            }
            r = backend.readable(), if !down.read_done => {
                r?;
                if matches!(pump(state, conn, backend, client, &down.pipe, false).await?, Pump::Eof) {
                    down.read_done = true;
                }
            }
        }
    }
    Ok(())
}

/// Move one bounded chunk: src → pipe → dst
async fn pump(
    state: &GatewayState,
    conn: &ConnectionEntry,
    src: &TcpStream,
    dst: &TcpStream,
    pipe: &Pipe,
    send_direction: bool,
) -> io::Result<Pump> {
    let src_fd = src.as_raw_fd();
    let dst_fd = dst.as_raw_fd();

    // Pull up to one chunk out of the source socket.
    let n = match src.try_io(Interest::READABLE, || {
        splice_fd(src_fd, pipe.write_fd, RATE_CHUNK)
    }) {
        Ok(0) => {
            // EOF: half-close the destination and let the opposite
            // direction continue.
            // SAFETY: dst_fd is a live socket owned by the caller.
            unsafe { libc::shutdown(dst_fd, libc::SHUT_WR) };
            return Ok(Pump::Eof);
        }
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Pump::NotReady),
        Err(e) => return Err(e),
    };

    // Pace the chunk before it reaches the destination.
    tokio::select! {
        biased;
        () = conn.token.cancelled() => return Ok(Pump::Moved),
        () = async {
            if send_direction {
                conn.limiter.acquire_send(n).await;
            } else {
                conn.limiter.acquire_recv(n).await;
            }
        } => {}
    }

    // Drain the pipe fully so the next select starts from empty.
    let mut remaining = n;
    while remaining > 0 {
        match dst.try_io(Interest::WRITABLE, || {
            splice_fd(pipe.read_fd, dst_fd, remaining)
        }) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(moved) => remaining -= moved,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                dst.writable().await?;
            }
            Err(e) => return Err(e),
        }
    }

    let n = n as u64;
    if send_direction {
        conn.metrics.add_sent(n);
        state.counters.add_sent(n);
    } else {
        conn.metrics.add_recv(n);
        state.counters.add_recv(n);
    }
    Ok(Pump::Moved)
}
