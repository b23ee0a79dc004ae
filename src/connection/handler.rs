//! Per-connection pipeline
//!
//! Runs the full state machine for one accepted socket:
//!
//! ```text
//! ACCEPT → [PROXY_IN?] → READ_HANDSHAKE → {STATUS | LOGIN}
//! STATUS → READ_STATUS_REQUEST → AWAIT_MOTD_DECISION
//!        → WRITE_STATUS_RESPONSE → (optional) PING/PONG → CLOSE
//! LOGIN  → READ_LOGIN_START → AWAIT_ROUTE_DECISION
//!        → reject? WRITE_DISCONNECT → CLOSE
//!        → DIAL_BACKEND → [PROXY_OUT?] → REPLAY → FORWARD → CLOSE
//! ```
//!
//! Errors never escalate past the owning connection. Whatever path ends the
//! pipeline (clean close, framing error, kick, panic), the registry entry
//! is dropped and exactly one disconnection event is emitted.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::api::decision::{MotdAction, MotdStatus, RouteAction, RouteTarget};
use crate::api::events::{MotdRequest, RouteRequest};
use crate::cache::{CacheKind, CachedDecision};
use crate::error::{GatewayError, PolicyError, ProtocolError};
use crate::outbound;
use crate::protocol::{
    self, encode_login_disconnect, encode_pong, encode_status_response, read_packet, Handshake,
    LoginStart, NextState, Packet,
};
use crate::proxy_protocol::{self, ProxyAddresses};
use crate::state::{ConnectionEntry, GatewayState};

/// Disconnect reason for dial failures
const REASON_BACKEND_UNAVAILABLE: &str = "backend unavailable";

/// Disconnect reason synthesized on decision timeout
const REASON_ROUTER_TIMEOUT: &str = "router timeout";

/// Disconnect reason for malformed login traffic
const REASON_PROTOCOL_VIOLATION: &str = "protocol violation";

/// Disconnect reason for cached rejections with no recorded reason
const REASON_REJECTED: &str = "Connection rejected";

/// Drops the registry entry and emits the disconnection event no matter how
/// the pipeline ended, panics included.
struct FinishGuard {
    state: Arc<GatewayState>,
    conn_id: u64,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.state.finish_connection(self.conn_id);
    }
}

/// Entry point for a connection task
pub(crate) async fn serve(state: Arc<GatewayState>, conn: Arc<ConnectionEntry>, stream: TcpStream) {
    let _guard = FinishGuard {
        state: Arc::clone(&state),
        conn_id: conn.id,
    };

    tokio::select! {
        () = conn.token.cancelled() => {
            debug!(conn = conn.id, "connection cancelled");
        }
        result = drive(&state, &conn, stream) => match result {
            Ok(()) => info!(conn = conn.id, "connection closed"),
            Err(e) => debug!(conn = conn.id, "connection ended: {e}"),
        }
    }
}

/// The pipeline proper; returning `Err` closes the socket silently
async fn drive(
    state: &Arc<GatewayState>,
    conn: &Arc<ConnectionEntry>,
    mut stream: TcpStream,
) -> Result<(), GatewayError> {
    let mode = state.options.read().proxy_protocol_in;
    let proxied = proxy_protocol::read_inbound(&mut stream, mode).await?;
    let peer = proxied.map_or(conn.peer_addr, |addrs| addrs.source);
    if let Some(addrs) = proxied {
        info!(conn = conn.id, real_ip = %addrs.source.ip(), "PROXY header accepted");
    }

    let handshake = Handshake::decode(&read_packet(&mut stream).await?)?;
    debug!(
        conn = conn.id,
        protocol = handshake.protocol_version,
        host = %handshake.server_address,
        state = %handshake.next_state,
        "handshake"
    );
    {
        let mut identity = conn.identity.lock();
        identity.protocol_version = handshake.protocol_version;
        identity.host = handshake.server_address.clone();
        identity.port = handshake.server_port;
    }

    match handshake.next_state {
        NextState::Status => serve_status(state, conn, stream, &handshake, peer).await,
        NextState::Login => serve_login(state, conn, stream, &handshake, peer).await,
    }
}

// ============================================================================
// Status path
// ============================================================================

async fn serve_status(
    state: &Arc<GatewayState>,
    conn: &Arc<ConnectionEntry>,
    mut stream: TcpStream,
    handshake: &Handshake,
    peer: SocketAddr,
) -> Result<(), GatewayError> {
    let request = read_packet(&mut stream).await?;
    if request.id != protocol::STATUS_REQUEST_PACKET_ID {
        return Err(ProtocolError::UnexpectedPacket {
            expected: protocol::STATUS_REQUEST_PACKET_ID,
            actual: request.id,
        }
        .into());
    }

    let peer_ip = peer.ip().to_string();
    let status = match resolve_motd(state, conn, handshake, &peer_ip).await? {
        Some(status) => status,
        // The status path has no in-band reject frame; close silently.
        None => return Ok(()),
    };

    // "auto" resolves against the live count, excluding this status
    // connection itself.
    let online = i32::try_from(state.counters.active().saturating_sub(1)).unwrap_or(i32::MAX);
    let json = status.build_status_json(handshake.protocol_version, online);
    stream
        .write_all(&encode_status_response(&json))
        .await
        .map_err(ProtocolError::Io)?;

    // The client may follow up with a ping; echo it and finish. EOF here is
    // a normal end of the status flow.
    match read_packet(&mut stream).await {
        Ok(ping) if ping.id == protocol::PING_PACKET_ID && ping.body.len() >= 8 => {
            let mut payload = [0u8; 8];
            payload.copy_from_slice(&ping.body[..8]);
            stream
                .write_all(&encode_pong(u64::from_be_bytes(payload)))
                .await
                .map_err(ProtocolError::Io)?;
        }
        _ => {}
    }
    Ok(())
}

/// Produce the status document, via cache or policy; `None` means close
/// without answering
async fn resolve_motd(
    state: &Arc<GatewayState>,
    conn: &Arc<ConnectionEntry>,
    handshake: &Handshake,
    peer_ip: &str,
) -> Result<Option<Box<MotdStatus>>, GatewayError> {
    match state
        .cache
        .get(CacheKind::Motd, peer_ip, &handshake.server_address)
    {
        Some(CachedDecision::Motd(status)) => {
            debug!(conn = conn.id, "MOTD served from cache");
            return Ok(Some(status));
        }
        Some(CachedDecision::Rejection { .. }) => {
            debug!(conn = conn.id, "cached rejection on status path");
            return Ok(None);
        }
        Some(CachedDecision::Route(_)) | None => {}
    }

    let request = MotdRequest {
        conn_id: conn.id,
        peer_ip: peer_ip.to_owned(),
        port: handshake.server_port,
        protocol: handshake.protocol_version,
        host: handshake.server_address.clone(),
    };
    let decision = match state.await_motd_decision(request).await {
        Ok(decision) => decision,
        Err(PolicyError::DecisionTimeout) => {
            warn!(conn = conn.id, "MOTD decision timed out");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let (action, directive) = decision.into_action();
    if let Some(directive) = &directive {
        let payload = match &action {
            MotdAction::Respond(status) => CachedDecision::Motd(status.clone()),
            MotdAction::Reject { reason } => CachedDecision::Rejection {
                reason: Some(reason.clone()),
            },
        };
        state.cache.insert(
            CacheKind::Motd,
            peer_ip,
            &handshake.server_address,
            payload,
            directive,
        );
    }

    match action {
        MotdAction::Respond(status) => Ok(Some(status)),
        MotdAction::Reject { reason } => {
            debug!(conn = conn.id, %reason, "status connection rejected");
            Ok(None)
        }
    }
}

// ============================================================================
// Login path
// ============================================================================

async fn serve_login(
    state: &Arc<GatewayState>,
    conn: &Arc<ConnectionEntry>,
    mut stream: TcpStream,
    handshake: &Handshake,
    peer: SocketAddr,
) -> Result<(), GatewayError> {
    let login_packet = read_packet(&mut stream).await?;
    let login = match LoginStart::decode(&login_packet) {
        Ok(login) => login,
        Err(e @ (ProtocolError::EmptyUsername | ProtocolError::UnexpectedPacket { .. })) => {
            debug!(conn = conn.id, "login protocol violation: {e}");
            return disconnect(stream, REASON_PROTOCOL_VIOLATION).await;
        }
        Err(e) => return Err(e.into()),
    };
    conn.identity.lock().username = Some(login.username.clone());

    let peer_ip = peer.ip().to_string();
    let action = match resolve_route(state, conn, handshake, &login, &peer_ip).await? {
        Some(action) => action,
        // Channel torn down mid-decision: the engine is shutting us out.
        None => return Ok(()),
    };

    let target = match action {
        RouteAction::Forward(target) => target,
        RouteAction::Reject { reason } => {
            info!(conn = conn.id, user = %login.username, %reason, "login rejected");
            return disconnect(stream, &reason).await;
        }
    };

    let backend = match outbound::dial(&target, state.connect_timeout).await {
        Ok(backend) => backend,
        Err(e) => {
            warn!(
                conn = conn.id,
                backend = %format!("{}:{}", target.host, target.port),
                "backend dial failed: {e}"
            );
            return disconnect(stream, REASON_BACKEND_UNAVAILABLE).await;
        }
    };

    info!(
        conn = conn.id,
        user = %login.username,
        backend = %format!("{}:{}", target.host, target.port),
        via_proxy = target.proxy.is_some(),
        "proxying connection"
    );

    replay_prologue(state, conn, stream, backend, handshake, &login_packet, &target, peer).await
}

/// Produce the routing action, via cache or policy; `None` means the
/// decision channel died and the connection should just close
async fn resolve_route(
    state: &Arc<GatewayState>,
    conn: &Arc<ConnectionEntry>,
    handshake: &Handshake,
    login: &LoginStart,
    peer_ip: &str,
) -> Result<Option<RouteAction>, GatewayError> {
    match state
        .cache
        .get(CacheKind::Route, peer_ip, &handshake.server_address)
    {
        Some(CachedDecision::Route(action)) => {
            debug!(conn = conn.id, "route served from cache");
            return Ok(Some(action));
        }
        Some(CachedDecision::Rejection { reason }) => {
            return Ok(Some(RouteAction::Reject {
                reason: reason.unwrap_or_else(|| REASON_REJECTED.to_owned()),
            }));
        }
        Some(CachedDecision::Motd(_)) | None => {}
    }

    let request = RouteRequest {
        conn_id: conn.id,
        peer_ip: peer_ip.to_owned(),
        port: handshake.server_port,
        protocol: handshake.protocol_version,
        host: handshake.server_address.clone(),
        username: login.username.clone(),
    };
    let decision = match state.await_route_decision(request).await {
        Ok(decision) => decision,
        Err(PolicyError::DecisionTimeout) => {
            warn!(conn = conn.id, "route decision timed out");
            return Ok(Some(RouteAction::Reject {
                reason: REASON_ROUTER_TIMEOUT.to_owned(),
            }));
        }
        Err(PolicyError::ChannelClosed) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let (action, directive) = match decision.into_action() {
        Ok(result) => result,
        Err(e) => {
            warn!(conn = conn.id, "unusable routing decision: {e}");
            (
                RouteAction::Reject {
                    reason: "invalid routing decision".to_owned(),
                },
                None,
            )
        }
    };

    if let Some(directive) = &directive {
        let payload = match &action {
            RouteAction::Reject { reason } => CachedDecision::Rejection {
                reason: Some(reason.clone()),
            },
            forward => CachedDecision::Route(forward.clone()),
        };
        state.cache.insert(
            CacheKind::Route,
            peer_ip,
            &handshake.server_address,
            payload,
            directive,
        );
    }

    Ok(Some(action))
}

/// Emit the optional PROXY header, replay the (rewritten) handshake and the
/// byte-exact login-start, then hand over to the forwarder
#[allow(clippy::too_many_arguments)]
async fn replay_prologue(
    state: &Arc<GatewayState>,
    conn: &Arc<ConnectionEntry>,
    client: TcpStream,
    mut backend: TcpStream,
    handshake: &Handshake,
    login_packet: &Packet,
    target: &RouteTarget,
    peer: SocketAddr,
) -> Result<(), GatewayError> {
    if let Some(version) = target.proxy_protocol {
        // With a SOCKS5 upstream this lands after negotiation, i.e. the
        // header travels to the final backend.
        let addrs = ProxyAddresses {
            source: peer,
            destination: backend.local_addr().map_err(ProtocolError::Io)?,
        };
        backend
            .write_all(&version.encode(&addrs))
            .await
            .map_err(ProtocolError::Io)?;
    }

    if let Some(new_host) = target.rewrite_host.as_deref() {
        info!(
            conn = conn.id,
            old_host = %handshake.server_address,
            new_host,
            "rewriting handshake host"
        );
    }
    let replayed = handshake.for_backend(target.rewrite_host.as_deref(), target.port);
    backend
        .write_all(&replayed.encode())
        .await
        .map_err(ProtocolError::Io)?;
    backend
        .write_all(&login_packet.raw)
        .await
        .map_err(ProtocolError::Io)?;

    super::forward::relay(Arc::clone(state), Arc::clone(conn), client, backend)
        .await
        .map_err(|e| crate::error::ConnectionError::Transfer(e).into())
}

/// Write a Login-Disconnect and shut the stream down
async fn disconnect(mut stream: TcpStream, reason: &str) -> Result<(), GatewayError> {
    stream
        .write_all(&encode_login_disconnect(reason))
        .await
        .map_err(ProtocolError::Io)?;
    let _ = stream.shutdown().await;
    Ok(())
}
