//! Minecraft Java Edition wire codec
//!
//! Implements the small slice of the protocol the gateway needs to speak:
//! VarInts, length-prefixed strings, packet framing, the handshake and
//! login-start prologue, and the status / login-disconnect responses.
//!
//! The gateway never looks past the prologue: once routing is decided, the
//! forwarder moves opaque bytes.

pub mod handshake;
pub mod login;
pub mod packet;
pub mod status;
pub mod varint;

pub use handshake::{Handshake, NextState};
pub use login::LoginStart;
pub use packet::{encode_packet, read_packet, write_packet, Packet};
pub use status::{encode_login_disconnect, encode_pong, encode_status_response};
pub use varint::{get_varint, put_varint, read_varint};

/// Handshake packet id (handshaking state, serverbound)
pub const HANDSHAKE_PACKET_ID: i32 = 0x00;

/// Login-start packet id (login state, serverbound)
pub const LOGIN_START_PACKET_ID: i32 = 0x00;

/// Disconnect packet id (login state, clientbound)
pub const LOGIN_DISCONNECT_PACKET_ID: i32 = 0x00;

/// Status-request packet id (status state, serverbound)
pub const STATUS_REQUEST_PACKET_ID: i32 = 0x00;

/// Status-response packet id (status state, clientbound)
pub const STATUS_RESPONSE_PACKET_ID: i32 = 0x00;

/// Ping / pong packet id (status state, both directions)
pub const PING_PACKET_ID: i32 = 0x01;
