//! Shared fixtures: a minimal Minecraft client codec, a capturing echo
//! backend, and polling helpers for the policy boundary.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use minegate::{Gateway, MotdRequest, RouteRequest};

/// How long fixtures wait before declaring a hang
pub const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Client-side wire helpers
// ============================================================================

pub fn put_varint(buf: &mut Vec<u8>, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            buf.push(v as u8);
            return;
        }
        buf.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
}

pub fn put_string(buf: &mut Vec<u8>, s: &str) {
    put_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

/// Frame a packet id + body
pub fn frame(id: i32, body: &[u8]) -> Vec<u8> {
    let mut inner = Vec::new();
    put_varint(&mut inner, id);
    inner.extend_from_slice(body);
    let mut packet = Vec::new();
    put_varint(&mut packet, inner.len() as i32);
    packet.extend_from_slice(&inner);
    packet
}

pub fn handshake_frame(protocol: i32, host: &str, port: u16, next_state: i32) -> Vec<u8> {
    let mut body = Vec::new();
    put_varint(&mut body, protocol);
    put_string(&mut body, host);
    body.extend_from_slice(&port.to_be_bytes());
    put_varint(&mut body, next_state);
    frame(0x00, &body)
}

pub fn login_frame(username: &str) -> Vec<u8> {
    let mut body = Vec::new();
    put_string(&mut body, username);
    frame(0x00, &body)
}

pub async fn read_varint(stream: &mut TcpStream) -> std::io::Result<i32> {
    let mut value = 0i32;
    let mut shift = 0u32;
    loop {
        let byte = stream.read_u8().await?;
        value |= i32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        assert!(shift < 35, "varint too long");
    }
}

/// Read one frame, returning `(packet_id, body)`
pub async fn read_frame(stream: &mut TcpStream) -> std::io::Result<(i32, Vec<u8>)> {
    let len = read_varint(stream).await?;
    assert!(len > 0, "non-positive frame length");
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    let mut slice = body.as_slice();
    let id = get_varint(&mut slice);
    Ok((id, slice.to_vec()))
}

pub fn get_varint(buf: &mut &[u8]) -> i32 {
    let mut value = 0i32;
    let mut shift = 0u32;
    loop {
        let (&byte, rest) = buf.split_first().expect("truncated varint");
        *buf = rest;
        value |= i32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return value;
        }
        shift += 7;
    }
}

pub fn get_string(buf: &mut &[u8]) -> String {
    let len = get_varint(buf) as usize;
    let (bytes, rest) = buf.split_at(len);
    *buf = rest;
    String::from_utf8(bytes.to_vec()).expect("invalid utf8")
}

/// Decoded handshake as observed by the backend fixture
#[derive(Debug)]
pub struct SeenHandshake {
    pub protocol: i32,
    pub host: String,
    pub port: u16,
    pub next_state: i32,
}

pub fn parse_handshake(body: &[u8]) -> SeenHandshake {
    let mut slice = body;
    let protocol = get_varint(&mut slice);
    let host = get_string(&mut slice);
    let port = u16::from_be_bytes([slice[0], slice[1]]);
    slice = &slice[2..];
    let next_state = get_varint(&mut slice);
    SeenHandshake {
        protocol,
        host,
        port,
        next_state,
    }
}

// ============================================================================
// Backend fixture
// ============================================================================

/// What the backend observed for one proxied connection
#[derive(Debug)]
pub struct BackendObservation {
    /// Raw bytes that arrived before the handshake frame (PROXY header)
    pub preamble: Vec<u8>,
    /// Handshake frame body
    pub handshake: SeenHandshake,
    /// The login-start frame exactly as received (length prefix included)
    pub raw_login_frame: Vec<u8>,
}

/// Spawn an echo backend that captures the prologue of `conns` connections
///
/// For each accepted connection it reports the prologue on the channel and
/// then echoes every subsequent byte back.
pub async fn spawn_echo_backend(
    conns: usize,
    expect_preamble: usize,
) -> (u16, mpsc::Receiver<BackendObservation>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel(conns.max(1));

    tokio::spawn(async move {
        for _ in 0..conns {
            let (mut socket, _) = listener.accept().await.unwrap();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut preamble = vec![0u8; expect_preamble];
                if expect_preamble > 0 {
                    socket.read_exact(&mut preamble).await.unwrap();
                }

                // Handshake frame.
                let (id, body) = read_backend_frame(&mut socket).await;
                assert_eq!(id, 0x00, "first frame must be the handshake");
                let handshake = parse_handshake(&body);

                // Login frame, raw bytes retained.
                let raw_login_frame = read_raw_frame(&mut socket).await;

                tx.send(BackendObservation {
                    preamble,
                    handshake,
                    raw_login_frame,
                })
                .await
                .unwrap();

                // Echo everything after the prologue.
                let mut buf = [0u8; 8192];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    (port, rx)
}

async fn read_backend_frame(socket: &mut TcpStream) -> (i32, Vec<u8>) {
    let len = read_varint(socket).await.unwrap();
    let mut body = vec![0u8; len as usize];
    socket.read_exact(&mut body).await.unwrap();
    let mut slice = body.as_slice();
    let id = get_varint(&mut slice);
    (id, slice.to_vec())
}

/// Read one frame keeping the exact wire bytes
async fn read_raw_frame(socket: &mut TcpStream) -> Vec<u8> {
    let mut raw = Vec::new();
    let len = loop {
        let byte = socket.read_u8().await.unwrap();
        raw.push(byte);
        if byte & 0x80 == 0 {
            let mut slice = raw.as_slice();
            break get_varint(&mut slice);
        }
    };
    let prefix = raw.len();
    raw.resize(prefix + len as usize, 0);
    socket.read_exact(&mut raw[prefix..]).await.unwrap();
    raw
}

// ============================================================================
// Policy helpers
// ============================================================================

/// Poll until a route request appears
pub async fn recv_route_request(gateway: &Gateway) -> RouteRequest {
    tokio::time::timeout(WAIT, async {
        loop {
            let mut events = gateway.poll_events();
            if let Some(request) = events.route_requests.pop() {
                return request;
            }
            assert!(
                events.motd_requests.is_empty(),
                "unexpected MOTD request while waiting for a route request"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("route request arrived")
}

/// Poll until a MOTD request appears
pub async fn recv_motd_request(gateway: &Gateway) -> MotdRequest {
    tokio::time::timeout(WAIT, async {
        loop {
            let mut events = gateway.poll_events();
            if let Some(request) = events.motd_requests.pop() {
                return request;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("MOTD request arrived")
}

/// Poll until at least `count` disconnection events have been seen
pub async fn recv_disconnections(gateway: &Gateway, count: usize) -> Vec<u64> {
    tokio::time::timeout(WAIT, async {
        let mut seen = Vec::new();
        loop {
            let events = gateway.poll_events();
            seen.extend(events.disconnection_events.iter().map(|e| e.conn_id));
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("disconnection events arrived")
}

/// Connect a client to a started listener
pub async fn connect_client(gateway: &Gateway, listener_id: u64) -> TcpStream {
    let addr = gateway.listener_addr(listener_id).unwrap();
    TcpStream::connect(addr).await.unwrap()
}
