//! Bidirectional forwarding
//!
//! Once the prologue is replayed, the connection degenerates to moving
//! opaque bytes. On Linux the kernel `splice(2)` fast path is used; other
//! platforms (and splice setup failure) take the metered fallback: one task
//! per direction, 4096-byte reads, token acquisition before every write,
//! and byte accounting into the per-connection and global counters.
//!
//! EOF on one direction half-closes the peer and leaves the opposite
//! direction running; an I/O error cancels both halves.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

use crate::limiter::RATE_CHUNK;
use crate::state::{ConnectionEntry, GatewayState};

/// Which way bytes are flowing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Client → backend
    Send,
    /// Backend → client
    Recv,
}

/// Relay bytes between client and backend until both directions close
///
/// # Errors
///
/// Returns the first I/O error from either direction. Cancellation is not
/// an error; the relay just stops.
pub async fn relay(
    state: Arc<GatewayState>,
    conn: Arc<ConnectionEntry>,
    client: TcpStream,
    backend: TcpStream,
) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        match super::splice::relay(&state, &conn, &client, &backend).await {
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                tracing::debug!(conn = conn.id, "splice unavailable, using metered path");
            }
            result => return result,
        }
    }
    relay_metered(state, conn, client, backend).await
}

/// Metered fallback: userspace copy with token-bucket pacing
async fn relay_metered(
    state: Arc<GatewayState>,
    conn: Arc<ConnectionEntry>,
    client: TcpStream,
    backend: TcpStream,
) -> io::Result<()> {
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let up = tokio::spawn(copy_direction(
        Arc::clone(&state),
        Arc::clone(&conn),
        client_read,
        backend_write,
        Direction::Send,
    ));
    let down = tokio::spawn(copy_direction(
        state,
        Arc::clone(&conn),
        backend_read,
        client_write,
        Direction::Recv,
    ));

    let (up, down) = tokio::join!(up, down);
    // A panicking direction task reads as a broken pipe here.
    let up = up.unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::BrokenPipe)));
    let down = down.unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::BrokenPipe)));
    up.and(down)
}

async fn copy_direction(
    state: Arc<GatewayState>,
    conn: Arc<ConnectionEntry>,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    direction: Direction,
) -> io::Result<()> {
    let mut buf = [0u8; RATE_CHUNK];
    let result = loop {
        let n = tokio::select! {
            biased;
            () = conn.token.cancelled() => break Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    // Half-close: tell the peer this direction is done and
                    // let the opposite one run on.
                    let _ = writer.shutdown().await;
                    trace!(conn = conn.id, ?direction, "EOF, write side shut down");
                    break Ok(());
                }
                Ok(n) => n,
                Err(e) => break Err(e),
            },
        };

        let mut wrote = 0usize;
        let write_result = loop {
            if wrote == n {
                break Ok(());
            }
            let chunk = &buf[wrote..n.min(wrote + RATE_CHUNK)];
            tokio::select! {
                biased;
                () = conn.token.cancelled() => break Ok(()),
                () = acquire(&conn, direction, chunk.len()) => {}
            }
            if let Err(e) = writer.write_all(chunk).await {
                break Err(e);
            }
            account(&state, &conn, direction, chunk.len() as u64);
            wrote += chunk.len();
        };
        if conn.token.is_cancelled() {
            break Ok(());
        }
        if let Err(e) = write_result {
            break Err(e);
        }
    };

    if result.is_err() {
        // An I/O error closes the whole connection, both halves.
        conn.token.cancel();
    }
    result
}

async fn acquire(conn: &ConnectionEntry, direction: Direction, bytes: usize) {
    match direction {
        Direction::Send => conn.limiter.acquire_send(bytes).await,
        Direction::Recv => conn.limiter.acquire_recv(bytes).await,
    }
}

fn account(state: &GatewayState, conn: &ConnectionEntry, direction: Direction, bytes: u64) {
    match direction {
        Direction::Send => {
            conn.metrics.add_sent(bytes);
            state.counters.add_sent(bytes);
        }
        Direction::Recv => {
            conn.metrics.add_recv(bytes);
            state.counters.add_recv(bytes);
        }
    }
}
