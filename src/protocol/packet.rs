//! Minecraft packet framing and string codec
//!
//! A packet on the wire is `VarInt length | VarInt packet-id | body`, where
//! the length covers the id and body but not itself. Strings are a VarInt
//! byte length followed by that many UTF-8 bytes.
//!
//! [`read_packet`] buffers exactly one frame and keeps the bytes as they
//! arrived, so the login-start frame can later be replayed to the backend
//! byte-for-byte even if the client used a non-canonical length encoding or
//! the frame carries trailing fields this gateway does not understand.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::varint::{get_varint, put_varint, read_varint_raw};
use crate::error::ProtocolError;

/// Maximum accepted frame length (id + body), matching the protocol's
/// 21-bit packet length bound
pub const MAX_FRAME_LEN: usize = 2_097_151;

/// Cap on the handshake `server_address` string
pub const MAX_HOST_LEN: usize = 32 * 1024;

/// Cap on the login-start username string
pub const MAX_USERNAME_LEN: usize = 16 * 1024;

/// One framed packet, with the original wire bytes retained
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet id (first VarInt of the frame body)
    pub id: i32,
    /// Frame body after the packet id
    pub body: Bytes,
    /// The complete frame exactly as received, length prefix included
    pub raw: Bytes,
}

/// Read one complete packet from the stream
///
/// # Errors
///
/// Returns [`ProtocolError::BadPacketLength`] when the declared length is
/// non-positive or exceeds [`MAX_FRAME_LEN`], and I/O / VarInt errors from
/// the underlying reads.
pub async fn read_packet<R>(stream: &mut R) -> Result<Packet, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let len = read_varint_raw(stream, &mut raw).await?;
    if len <= 0 || len as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::BadPacketLength(len));
    }

    let prefix_len = raw.len();
    raw.resize(prefix_len + len as usize, 0);
    stream.read_exact(&mut raw[prefix_len..]).await?;

    let mut frame = &raw[prefix_len..];
    let id = get_varint(&mut frame)?;
    let body_offset = raw.len() - frame.len();

    let raw = Bytes::from(raw);
    let body = raw.slice(body_offset..);
    Ok(Packet { id, body, raw })
}

/// Frame a packet id + body and write it to the stream
///
/// # Errors
///
/// Returns any I/O error from the write.
pub async fn write_packet<W>(stream: &mut W, id: i32, body: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let packet = encode_packet(id, body);
    stream.write_all(&packet).await?;
    Ok(())
}

/// Frame a packet id + body into a standalone byte vector
#[must_use]
pub fn encode_packet(id: i32, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 5);
    put_varint(&mut frame, id);
    frame.extend_from_slice(body);

    let mut packet = Vec::with_capacity(frame.len() + 5);
    put_varint(&mut packet, frame.len() as i32);
    packet.extend_from_slice(&frame);
    packet
}

/// Decode a length-prefixed string from the front of a slice
///
/// # Errors
///
/// Rejects lengths beyond `cap` ([`ProtocolError::StringTooLong`]),
/// truncated bodies, and invalid UTF-8.
pub fn get_string(buf: &mut &[u8], cap: usize) -> Result<String, ProtocolError> {
    let len = get_varint(buf)?;
    if len < 0 {
        return Err(ProtocolError::Truncated);
    }
    let len = len as usize;
    if len > cap {
        return Err(ProtocolError::StringTooLong { len, max: cap });
    }
    if buf.len() < len {
        return Err(ProtocolError::Truncated);
    }
    let (bytes, rest) = buf.split_at(len);
    *buf = rest;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Append a length-prefixed string to a buffer
pub fn put_string(buf: &mut Vec<u8>, s: &str) {
    put_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

/// Decode a big-endian u16 from the front of a slice
pub fn get_u16(buf: &mut &[u8]) -> Result<u16, ProtocolError> {
    if buf.len() < 2 {
        return Err(ProtocolError::Truncated);
    }
    let (bytes, rest) = buf.split_at(2);
    *buf = rest;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}
