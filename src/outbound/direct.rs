//! Direct backend dial
//!
//! Resolves the target and opens a TCP connection with a deadline. Nagle is
//! disabled (the prologue is latency-sensitive) and keepalive is enabled to
//! detect dead backends on long-lived player connections.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::OutboundError;

/// Idle time before the first keepalive probe
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Interval between keepalive probes
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Connect to `host:port` within `deadline`
///
/// # Errors
///
/// Returns [`OutboundError::Timeout`] when the deadline expires and
/// [`OutboundError::ConnectFailed`] for resolution or connect failures.
pub async fn connect(
    host: &str,
    port: u16,
    deadline: Duration,
) -> Result<TcpStream, OutboundError> {
    let target = format!("{host}:{port}");
    let stream = timeout(deadline, TcpStream::connect((host, port)))
        .await
        .map_err(|_| OutboundError::Timeout {
            target: target.clone(),
            timeout_secs: deadline.as_secs(),
        })?
        .map_err(|e| OutboundError::connect_failed(&target, e.to_string()))?;

    configure(&stream);
    debug!(%target, "backend connected");
    Ok(stream)
}

/// Apply socket options; failures here are not fatal
fn configure(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}
