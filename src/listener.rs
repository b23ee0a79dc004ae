//! Listener lifecycle and accept loop
//!
//! Each started listener owns one accept-loop task. Binding happens before
//! the task is spawned so bind failures surface synchronously to the
//! boundary API. Stopping a listener cancels only its accept loop; extant
//! connections keep running.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection;
use crate::error::ListenerError;
use crate::state::{GatewayState, ListenerEntry};

/// Bind `host:port` and start accepting
///
/// # Errors
///
/// Returns [`ListenerError::Bind`] when the socket cannot be bound.
pub(crate) async fn start(
    state: Arc<GatewayState>,
    host: &str,
    port: u16,
) -> Result<u64, ListenerError> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ListenerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ListenerError::Bind { addr, source })?;

    let id = state.next_listener_id();
    let token = CancellationToken::new();
    let entry = Arc::new(ListenerEntry {
        id,
        local_addr,
        proxy_mode: state.options.read().proxy_protocol_in,
        token: token.clone(),
    });
    info!(listener = id, addr = %local_addr, proxy_in = %entry.proxy_mode, "listener started");
    state.listeners.insert(id, entry);

    tokio::spawn(accept_loop(state, id, listener, token));
    Ok(id)
}

/// Accept until cancelled or a fatal accept error
async fn accept_loop(
    state: Arc<GatewayState>,
    id: u64,
    listener: TcpListener,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => {
                info!(listener = id, "listener stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conn = state.register_connection(peer);
                    tracing::debug!(listener = id, conn = conn.id, %peer, "accepted");
                    tokio::spawn(connection::serve(Arc::clone(&state), conn, stream));
                }
                Err(e) if is_transient(&e) => {
                    warn!(listener = id, "transient accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                Err(e) => {
                    // Fatal accept errors end only this listener.
                    error!(listener = id, "accept failed: {e}");
                    break;
                }
            }
        }
    }
    state.listeners.remove(&id);
}

/// Accept errors worth retrying instead of killing the listener
/// (peer aborts, signal interruptions, fd pressure)
fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
