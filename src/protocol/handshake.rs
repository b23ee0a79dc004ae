//! Handshake packet parsing and serialization
//!
//! The handshake is the first packet on every Minecraft connection:
//!
//! ```text
//! +-----------+------------------+----------------+-------------+------------+
//! | id (0x00) | protocol_version | server_address | server_port | next_state |
//! +-----------+------------------+----------------+-------------+------------+
//! |  VarInt   |      VarInt      |     String     |   u16 (BE)  |   VarInt   |
//! +-----------+------------------+----------------+-------------+------------+
//! ```
//!
//! `next_state` selects the follow-up protocol state: 1 for a server-list
//! status query, 2 for login.

use super::packet::{encode_packet, get_string, get_u16, Packet, MAX_HOST_LEN};
use super::varint::{get_varint, put_varint};
use super::HANDSHAKE_PACKET_ID;
use crate::error::ProtocolError;

/// Protocol state requested by the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum NextState {
    /// Server list ping (status) flow
    Status = 1,
    /// Login flow
    Login = 2,
}

impl NextState {
    /// Create from the raw VarInt value
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownNextState`] for anything other
    /// than 1 or 2.
    pub fn from_raw(value: i32) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Self::Status),
            2 => Ok(Self::Login),
            other => Err(ProtocolError::UnknownNextState(other)),
        }
    }

    /// Raw VarInt value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for NextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::Login => write!(f, "login"),
        }
    }
}

/// Decoded handshake packet
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Client protocol version
    pub protocol_version: i32,
    /// Hostname the client dialed (pre-rewrite)
    pub server_address: String,
    /// Port the client dialed
    pub server_port: u16,
    /// Requested follow-up state
    pub next_state: NextState,
}

impl Handshake {
    /// Decode a handshake from a framed packet
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedPacket`] when the frame is not a
    /// handshake, plus field-level decode errors.
    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        if packet.id != HANDSHAKE_PACKET_ID {
            return Err(ProtocolError::UnexpectedPacket {
                expected: HANDSHAKE_PACKET_ID,
                actual: packet.id,
            });
        }
        let mut body = &packet.body[..];
        let protocol_version = get_varint(&mut body)?;
        let server_address = get_string(&mut body, MAX_HOST_LEN)?;
        let server_port = get_u16(&mut body)?;
        let next_state = NextState::from_raw(get_varint(&mut body)?)?;
        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    /// Serialize to a complete frame, length prefix included
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.server_address.len() + 16);
        put_varint(&mut body, self.protocol_version);
        super::packet::put_string(&mut body, &self.server_address);
        body.extend_from_slice(&self.server_port.to_be_bytes());
        put_varint(&mut body, self.next_state.as_raw());
        encode_packet(HANDSHAKE_PACKET_ID, &body)
    }

    /// Build the handshake replayed to the backend: host optionally
    /// rewritten, port set to the dialed backend port, state forced to login
    #[must_use]
    pub fn for_backend(&self, rewrite_host: Option<&str>, backend_port: u16) -> Self {
        Self {
            protocol_version: self.protocol_version,
            server_address: rewrite_host
                .map_or_else(|| self.server_address.clone(), str::to_owned),
            server_port: backend_port,
            next_state: NextState::Login,
        }
    }
}
