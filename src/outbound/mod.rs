//! Backend dial
//!
//! Routes resolve to either a direct TCP connection or a SOCKS5 CONNECT
//! through an upstream relay. Either way the result is a plain
//! [`TcpStream`] to (or tunneled to) the backend, ready for the handshake
//! replay.

pub mod direct;
pub mod socks5;

use std::time::Duration;

use tokio::net::TcpStream;

use crate::api::decision::RouteTarget;
use crate::error::OutboundError;

/// Dial the backend named by a routing decision
///
/// # Errors
///
/// Propagates dial and SOCKS5 negotiation failures; the pipeline maps all
/// of them to a "backend unavailable" disconnect.
pub async fn dial(target: &RouteTarget, deadline: Duration) -> Result<TcpStream, OutboundError> {
    match &target.proxy {
        Some(proxy) => socks5::connect(proxy, &target.host, target.port, deadline).await,
        None => direct::connect(&target.host, target.port, deadline).await,
    }
}
