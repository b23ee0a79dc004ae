//! Login-start packet parsing
//!
//! The gateway only needs the username out of login-start. Everything after
//! it (UUID, signature data on newer protocol versions) is opaque: the
//! backend receives the raw frame bytes untouched, so unknown trailing
//! fields survive the replay.

use super::packet::{get_string, Packet, MAX_USERNAME_LEN};
use super::LOGIN_START_PACKET_ID;
use crate::error::ProtocolError;

/// Decoded login-start packet
#[derive(Debug, Clone)]
pub struct LoginStart {
    /// Player username as sent by the client
    pub username: String,
}

impl LoginStart {
    /// Decode a login-start from a framed packet
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedPacket`] for a wrong packet id and
    /// [`ProtocolError::EmptyUsername`] for a zero-length username.
    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        if packet.id != LOGIN_START_PACKET_ID {
            return Err(ProtocolError::UnexpectedPacket {
                expected: LOGIN_START_PACKET_ID,
                actual: packet.id,
            });
        }
        let mut body = &packet.body[..];
        let username = get_string(&mut body, MAX_USERNAME_LEN)?;
        if username.is_empty() {
            return Err(ProtocolError::EmptyUsername);
        }
        Ok(Self { username })
    }
}
