//! Boundary event types
//!
//! These are the JSON frames the policy layer drains by polling. Field
//! names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Routing request emitted once per login-path connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    /// Connection id
    pub conn_id: u64,
    /// Client IP (post PROXY-Protocol rewrite)
    pub peer_ip: String,
    /// Port the client dialed
    pub port: u16,
    /// Client protocol version from the handshake
    pub protocol: i32,
    /// Hostname the client dialed (pre-rewrite)
    pub host: String,
    /// Username from login-start
    pub username: String,
}

/// MOTD request emitted once per status-path connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotdRequest {
    /// Connection id
    pub conn_id: u64,
    /// Client IP (post PROXY-Protocol rewrite)
    pub peer_ip: String,
    /// Port the client dialed
    pub port: u16,
    /// Client protocol version from the handshake
    pub protocol: i32,
    /// Hostname the client dialed
    pub host: String,
}

/// Emitted exactly once per connection after its pipeline ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectionEvent {
    /// Connection id
    pub conn_id: u64,
}

/// Batch of everything pending, drained by one poll
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollEvents {
    /// Pending routing requests, FIFO
    pub route_requests: Vec<RouteRequest>,
    /// Pending MOTD requests, FIFO
    pub motd_requests: Vec<MotdRequest>,
    /// Pending disconnection events, FIFO
    pub disconnection_events: Vec<DisconnectionEvent>,
}

impl PollEvents {
    /// True when nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.route_requests.is_empty()
            && self.motd_requests.is_empty()
            && self.disconnection_events.is_empty()
    }
}
