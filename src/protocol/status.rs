//! Status-state and login-disconnect packet serializers
//!
//! The status flow is stateless: the client sends an empty status request,
//! the server answers with a JSON document, then the client may send an
//! 8-byte ping which is echoed back verbatim as a pong.

use super::packet::encode_packet;
use super::{LOGIN_DISCONNECT_PACKET_ID, PING_PACKET_ID, STATUS_RESPONSE_PACKET_ID};

/// Serialize a Status-Response frame carrying the given status JSON
#[must_use]
pub fn encode_status_response(status_json: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(status_json.len() + 5);
    super::packet::put_string(&mut body, status_json);
    encode_packet(STATUS_RESPONSE_PACKET_ID, &body)
}

/// Serialize a Pong frame echoing the client's ping payload
#[must_use]
pub fn encode_pong(payload: u64) -> Vec<u8> {
    encode_packet(PING_PACKET_ID, &payload.to_be_bytes())
}

/// Serialize a login-state Disconnect frame
///
/// The reason is wrapped into a `{"text": ...}` chat component unless the
/// policy already supplied component JSON (detected by a leading `{`).
#[must_use]
pub fn encode_login_disconnect(reason: &str) -> Vec<u8> {
    let component = if reason.trim_start().starts_with('{') {
        reason.to_owned()
    } else {
        serde_json::json!({ "text": reason }).to_string()
    };
    let mut body = Vec::with_capacity(component.len() + 5);
    super::packet::put_string(&mut body, &component);
    encode_packet(LOGIN_DISCONNECT_PACKET_ID, &body)
}
