//! Login-path end-to-end tests: routing, rejection, rewrite, replay
//! fidelity, and failure handling.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use minegate::{Gateway, GatewayConfig, RouteDecision};

use super::fixtures::{
    connect_client, get_string, handshake_frame, login_frame, read_frame, recv_route_request,
    spawn_echo_backend, WAIT,
};

fn gateway() -> Gateway {
    Gateway::new(&GatewayConfig::default())
}

#[tokio::test]
async fn simple_route_replays_prologue_and_echoes() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();
    let (backend_port, mut observed) = spawn_echo_backend(1, 0).await;

    let mut client = connect_client(&gw, listener).await;
    let client_port = gw.listener_addr(listener).unwrap().port();
    client
        .write_all(&handshake_frame(47, "mc.example.com", client_port, 2))
        .await
        .unwrap();
    let login = login_frame("tester");
    client.write_all(&login).await.unwrap();

    let request = recv_route_request(&gw).await;
    assert_eq!(request.host, "mc.example.com");
    assert_eq!(request.username, "tester");
    assert_eq!(request.protocol, 47);
    assert_eq!(request.peer_ip, "127.0.0.1");

    gw.submit_route_decision(request.conn_id, RouteDecision::forward("127.0.0.1", backend_port))
        .unwrap();

    let seen = tokio::time::timeout(WAIT, observed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.handshake.host, "mc.example.com");
    assert_eq!(seen.handshake.port, backend_port);
    assert_eq!(seen.handshake.next_state, 2);
    assert_eq!(seen.handshake.protocol, 47);
    assert_eq!(seen.raw_login_frame, login);

    // Bytes after login-start are forwarded and echoed back unchanged.
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let mut echoed = vec![0u8; payload.len()];
    let (mut reader, mut writer) = client.split();
    let (w, r) = tokio::join!(writer.write_all(&payload), reader.read_exact(&mut echoed));
    w.unwrap();
    r.unwrap();
    assert_eq!(echoed, payload);

    // Per-connection counters cover both directions of the echo.
    let metrics = gw.connection_metrics(request.conn_id).unwrap();
    assert!(metrics.bytes_sent >= payload.len() as u64);
    assert!(metrics.bytes_recv >= payload.len() as u64);
}

#[tokio::test]
async fn reject_sends_single_disconnect_packet() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "mc.example.com", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("tester")).await.unwrap();

    let request = recv_route_request(&gw).await;
    gw.submit_route_decision(request.conn_id, RouteDecision::reject("§cnope"))
        .unwrap();

    let (id, body) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);
    let mut slice = body.as_slice();
    let reason: serde_json::Value = serde_json::from_str(&get_string(&mut slice)).unwrap();
    assert_eq!(reason["text"], "§cnope");

    // Exactly one packet, then the socket closes.
    let mut rest = Vec::new();
    tokio::time::timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn rewrite_host_changes_handshake_only() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();
    let (backend_port, mut observed) = spawn_echo_backend(1, 0).await;

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(760, "play.public.net", 25565, 2))
        .await
        .unwrap();
    let login = login_frame("renamer");
    client.write_all(&login).await.unwrap();

    let request = recv_route_request(&gw).await;
    let decision = RouteDecision {
        rewrite_host: Some("backend.internal".into()),
        ..RouteDecision::forward("127.0.0.1", backend_port)
    };
    gw.submit_route_decision(request.conn_id, decision).unwrap();

    let seen = tokio::time::timeout(WAIT, observed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.handshake.host, "backend.internal");
    assert_eq!(seen.handshake.port, backend_port);
    // Login-start is byte-exact despite the rewrite.
    assert_eq!(seen.raw_login_frame, login);
}

#[tokio::test]
async fn backend_unavailable_disconnects() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    // Reserve a port that refuses connections.
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("tester")).await.unwrap();

    let request = recv_route_request(&gw).await;
    gw.submit_route_decision(request.conn_id, RouteDecision::forward("127.0.0.1", dead_port))
        .unwrap();

    let (id, body) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);
    let mut slice = body.as_slice();
    let reason: serde_json::Value = serde_json::from_str(&get_string(&mut slice)).unwrap();
    assert_eq!(reason["text"], "backend unavailable");
}

#[tokio::test]
async fn decision_timeout_synthesizes_reject() {
    let config = GatewayConfig {
        decision_timeout_ms: 150,
        ..GatewayConfig::default()
    };
    let gw = Gateway::new(&config);
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("tester")).await.unwrap();

    // Never submit a decision; the engine rejects on its own.
    let (id, body) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);
    let mut slice = body.as_slice();
    let reason: serde_json::Value = serde_json::from_str(&get_string(&mut slice)).unwrap();
    assert_eq!(reason["text"], "router timeout");
}

#[tokio::test]
async fn second_submission_is_non_fatal() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();
    let (backend_port, _observed) = spawn_echo_backend(1, 0).await;

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("tester")).await.unwrap();

    let request = recv_route_request(&gw).await;
    gw.submit_route_decision(request.conn_id, RouteDecision::forward("127.0.0.1", backend_port))
        .unwrap();
    let second = gw.submit_route_decision(
        request.conn_id,
        RouteDecision::forward("127.0.0.1", backend_port),
    );
    assert!(second.is_err());
}

#[tokio::test]
async fn empty_username_is_protocol_violation() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("")).await.unwrap();

    let (id, body) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);
    let mut slice = body.as_slice();
    let reason: serde_json::Value = serde_json::from_str(&get_string(&mut slice)).unwrap();
    assert_eq!(reason["text"], "protocol violation");

    // No route request ever reached the policy queue.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gw.poll_events().route_requests.is_empty());
}

#[tokio::test]
async fn inbound_proxy_header_rewrites_peer_ip() {
    let config = GatewayConfig {
        options: minegate::GatewayOptions {
            proxy_protocol_in: minegate::InboundProxyMode::Strict,
        },
        ..GatewayConfig::default()
    };
    let gw = Gateway::new(&config);
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(b"PROXY TCP4 203.0.113.77 10.0.0.1 56000 25565\r\n")
        .await
        .unwrap();
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("proxied")).await.unwrap();

    let request = recv_route_request(&gw).await;
    assert_eq!(request.peer_ip, "203.0.113.77");
}

#[tokio::test]
async fn outbound_proxy_v2_header_reaches_backend() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();
    // v2 header for an IPv4 pair: 16-byte fixed part + 12-byte addresses.
    let (backend_port, mut observed) = spawn_echo_backend(1, 28).await;

    let mut client = connect_client(&gw, listener).await;
    let client_addr = client.local_addr().unwrap();
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    let login = login_frame("tester");
    client.write_all(&login).await.unwrap();

    let request = recv_route_request(&gw).await;
    let decision: RouteDecision = serde_json::from_value(serde_json::json!({
        "remoteHost": "127.0.0.1",
        "remotePort": backend_port,
        "proxyProtocol": 2
    }))
    .unwrap();
    gw.submit_route_decision(request.conn_id, decision).unwrap();

    let seen = tokio::time::timeout(WAIT, observed.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed = minegate::proxy_protocol::v2::parse(
        seen.preamble[12],
        seen.preamble[13],
        &seen.preamble[16..],
    )
    .unwrap()
    .unwrap();
    assert_eq!(parsed.source, client_addr);

    // The prologue after the header is untouched.
    assert_eq!(seen.handshake.port, backend_port);
    assert_eq!(seen.raw_login_frame, login);
}

#[tokio::test]
async fn invalid_decision_rejects_instead_of_dialing() {
    let gw = gateway();
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("tester")).await.unwrap();

    let request = recv_route_request(&gw).await;
    // No disconnect, no remoteHost: unusable.
    gw.submit_route_decision(request.conn_id, RouteDecision::default())
        .unwrap();

    let (id, body) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);
    let mut slice = body.as_slice();
    let reason: serde_json::Value = serde_json::from_str(&get_string(&mut slice)).unwrap();
    assert_eq!(reason["text"], "invalid routing decision");
}
