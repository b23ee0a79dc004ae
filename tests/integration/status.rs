//! Status-path end-to-end tests: MOTD delivery, `"auto"` substitution,
//! ping/pong, and silent rejection.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use minegate::{Gateway, GatewayConfig, MotdDecision, RouteDecision};

use super::fixtures::{
    connect_client, frame, get_string, handshake_frame, login_frame, read_frame,
    recv_motd_request, recv_route_request, spawn_echo_backend, WAIT,
};

fn motd_decision(json: serde_json::Value) -> MotdDecision {
    serde_json::from_value(json).unwrap()
}

#[tokio::test]
async fn status_with_auto_fill() {
    let gw = Gateway::new(&GatewayConfig::default());
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();
    let (backend_port, _observed) = spawn_echo_backend(1, 0).await;

    // Hold one login connection open so the active count is non-trivial.
    let mut player = connect_client(&gw, listener).await;
    player
        .write_all(&handshake_frame(47, "mc.example.com", 25565, 2))
        .await
        .unwrap();
    player.write_all(&login_frame("occupant")).await.unwrap();
    let route = recv_route_request(&gw).await;
    gw.submit_route_decision(route.conn_id, RouteDecision::forward("127.0.0.1", backend_port))
        .unwrap();

    // Now run the status flow.
    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "mc.example.com", 25565, 1))
        .await
        .unwrap();
    client.write_all(&frame(0x00, &[])).await.unwrap();

    let request = recv_motd_request(&gw).await;
    assert_eq!(request.host, "mc.example.com");
    assert_eq!(request.protocol, 47);

    gw.submit_motd_decision(
        request.conn_id,
        motd_decision(serde_json::json!({
            "version": {"name": "x", "protocol": "auto"},
            "players": {"max": 100, "online": "auto"},
            "description": {"text": "hi"}
        })),
    )
    .unwrap();

    let (id, body) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);
    let mut slice = body.as_slice();
    let status: serde_json::Value = serde_json::from_str(&get_string(&mut slice)).unwrap();

    assert_eq!(status["version"]["protocol"], 47);
    assert_eq!(status["version"]["name"], "x");
    assert_eq!(status["players"]["max"], 100);
    // Active connections excluding this status connection: just the player.
    assert_eq!(status["players"]["online"], 1);
    assert_eq!(status["description"]["text"], "hi");
}

#[tokio::test]
async fn ping_pong_echoes_payload() {
    let gw = Gateway::new(&GatewayConfig::default());
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 1))
        .await
        .unwrap();
    client.write_all(&frame(0x00, &[])).await.unwrap();

    let request = recv_motd_request(&gw).await;
    gw.submit_motd_decision(
        request.conn_id,
        motd_decision(serde_json::json!({"description": {"text": "pingable"}})),
    )
    .unwrap();

    // Consume the status response.
    let (id, _) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x00);

    // Send the ping; the pong must echo the payload verbatim.
    let payload = 0x0123_4567_89AB_CDEFu64;
    client
        .write_all(&frame(0x01, &payload.to_be_bytes()))
        .await
        .unwrap();

    let (id, body) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0x01);
    assert_eq!(body, payload.to_be_bytes());
}

#[tokio::test]
async fn motd_disconnect_closes_silently() {
    let gw = Gateway::new(&GatewayConfig::default());
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 1))
        .await
        .unwrap();
    client.write_all(&frame(0x00, &[])).await.unwrap();

    let request = recv_motd_request(&gw).await;
    gw.submit_motd_decision(
        request.conn_id,
        motd_decision(serde_json::json!({"disconnect": "go away"})),
    )
    .unwrap();

    // No status frame, no disconnect frame: the socket just closes.
    let mut rest = Vec::new();
    tokio::time::timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn status_connection_emits_disconnection_event() {
    let gw = Gateway::new(&GatewayConfig::default());
    let listener = gw.start_listener("127.0.0.1", 0).await.unwrap();

    let mut client = connect_client(&gw, listener).await;
    client
        .write_all(&handshake_frame(47, "h", 25565, 1))
        .await
        .unwrap();
    client.write_all(&frame(0x00, &[])).await.unwrap();

    let request = recv_motd_request(&gw).await;
    gw.submit_motd_decision(
        request.conn_id,
        motd_decision(serde_json::json!({"description": {"text": ""}})),
    )
    .unwrap();

    let (_, _) = tokio::time::timeout(WAIT, read_frame(&mut client))
        .await
        .unwrap()
        .unwrap();
    drop(client);

    let ids = super::fixtures::recv_disconnections(&gw, 1).await;
    assert!(ids.contains(&request.conn_id));
}
