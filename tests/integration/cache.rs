//! Decision-cache end-to-end tests: repeat connections bypass the policy
//! layer while still producing well-formed backend prologues.

use std::time::Duration;

use tokio::io::AsyncWriteExt;

use minegate::{Gateway, GatewayConfig, RouteDecision};

use super::fixtures::{
    connect_client, handshake_frame, login_frame, recv_route_request, spawn_echo_backend, WAIT,
};

#[tokio::test]
async fn cached_route_skips_policy_round_trip() {
    let gw = Gateway::new(&GatewayConfig::default());
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();
    let (backend_port, mut observed) = spawn_echo_backend(2, 0).await;

    // First connection: policy answers with a cache directive.
    let mut first = connect_client(&gw, listener).await;
    first
        .write_all(&handshake_frame(47, "mc.example.com", 25565, 2))
        .await
        .unwrap();
    first.write_all(&login_frame("first")).await.unwrap();

    let request = recv_route_request(&gw).await;
    let decision: RouteDecision = serde_json::from_value(serde_json::json!({
        "remoteHost": "127.0.0.1",
        "remotePort": backend_port,
        "cache": {"granularity": "Ip", "ttl": 3000}
    }))
    .unwrap();
    gw.submit_route_decision(request.conn_id, decision).unwrap();

    let seen = tokio::time::timeout(WAIT, observed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.handshake.port, backend_port);
    assert_eq!(gw.cache_stats().total_entries, 1);

    // Second connection from the same ip within the TTL: no new request on
    // the queue, backend still gets a correct prologue.
    let mut second = connect_client(&gw, listener).await;
    second
        .write_all(&handshake_frame(47, "mc.example.com", 25565, 2))
        .await
        .unwrap();
    let login = login_frame("second");
    second.write_all(&login).await.unwrap();

    let seen = tokio::time::timeout(WAIT, observed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.handshake.host, "mc.example.com");
    assert_eq!(seen.handshake.port, backend_port);
    assert_eq!(seen.raw_login_frame, login);

    // The policy queue never saw a second route request.
    assert!(gw.poll_events().route_requests.is_empty());
}

#[tokio::test]
async fn cached_rejection_applies_to_repeat_connections() {
    let gw = Gateway::new(&GatewayConfig::default());
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut first = connect_client(&gw, listener).await;
    first
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    first.write_all(&login_frame("banned")).await.unwrap();

    let request = recv_route_request(&gw).await;
    let decision: RouteDecision = serde_json::from_value(serde_json::json!({
        "disconnect": "blocked",
        "cache": {
            "granularity": "Ip", "ttl": 60000,
            "reject": true, "rejectReason": "blocked"
        }
    }))
    .unwrap();
    gw.submit_route_decision(request.conn_id, decision).unwrap();

    // First client gets its disconnect.
    let (id, _) = tokio::time::timeout(WAIT, super::fixtures::read_frame(&mut first))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);

    // Second client is rejected straight from the cache.
    let mut second = connect_client(&gw, listener).await;
    second
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    second.write_all(&login_frame("banned2")).await.unwrap();

    let (id, body) = tokio::time::timeout(WAIT, super::fixtures::read_frame(&mut second))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);
    let mut slice = body.as_slice();
    let reason: serde_json::Value =
        serde_json::from_str(&super::fixtures::get_string(&mut slice)).unwrap();
    assert_eq!(reason["text"], "blocked");

    assert!(gw.poll_events().route_requests.is_empty());
}

#[tokio::test]
async fn expired_entries_are_swept() {
    let gw = Gateway::new(&GatewayConfig::default());
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();
    let (backend_port, mut observed) = spawn_echo_backend(1, 0).await;

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 2))
        .await
        .unwrap();
    client.write_all(&login_frame("brief")).await.unwrap();

    let request = recv_route_request(&gw).await;
    let decision: RouteDecision = serde_json::from_value(serde_json::json!({
        "remoteHost": "127.0.0.1",
        "remotePort": backend_port,
        "cache": {"granularity": "IpHost", "ttl": 30}
    }))
    .unwrap();
    gw.submit_route_decision(request.conn_id, decision).unwrap();
    tokio::time::timeout(WAIT, observed.recv()).await.unwrap().unwrap();

    assert_eq!(gw.cache_stats().total_entries, 1);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(gw.cache_stats().expired_entries, 1);

    gw.cleanup_cache();
    let stats = gw.cache_stats();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.expired_entries, 0);
}
