//! Minecraft VarInt encoding and decoding
//!
//! VarInts are little-endian base-128: seven data bits per byte, high bit
//! set on every byte except the last. At most 5 bytes encode any `i32`;
//! negative values sign-extend to the full 5 bytes and round-trip, but the
//! gateway never produces them itself.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtocolError;

/// Maximum number of bytes in an encoded VarInt
pub const MAX_VARINT_LEN: usize = 5;

/// Read a VarInt from an async stream
///
/// # Errors
///
/// Returns [`ProtocolError::VarIntTooLong`] if no terminating byte appears
/// within 5 bytes, or an I/O error from the underlying stream.
pub async fn read_varint<R>(stream: &mut R) -> Result<i32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut value = 0i32;
    let mut shift = 0u32;
    loop {
        let byte = stream.read_u8().await?;
        value |= i32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 7 * MAX_VARINT_LEN as u32 {
            return Err(ProtocolError::VarIntTooLong);
        }
    }
}

/// Read a VarInt from an async stream, collecting the raw bytes as read
///
/// Used where the original on-wire encoding must be preserved verbatim
/// (login-start replay).
pub async fn read_varint_raw<R>(stream: &mut R, raw: &mut Vec<u8>) -> Result<i32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut value = 0i32;
    let mut shift = 0u32;
    loop {
        let byte = stream.read_u8().await?;
        raw.push(byte);
        value |= i32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 7 * MAX_VARINT_LEN as u32 {
            return Err(ProtocolError::VarIntTooLong);
        }
    }
}

/// Decode a VarInt from the front of a slice, advancing it
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] if the slice ends mid-VarInt, or
/// [`ProtocolError::VarIntTooLong`] on a missing terminator after 5 bytes.
pub fn get_varint(buf: &mut &[u8]) -> Result<i32, ProtocolError> {
    let mut value = 0i32;
    let mut shift = 0u32;
    loop {
        let (&byte, rest) = buf.split_first().ok_or(ProtocolError::Truncated)?;
        *buf = rest;
        value |= i32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 7 * MAX_VARINT_LEN as u32 {
            return Err(ProtocolError::VarIntTooLong);
        }
    }
}

/// Append the VarInt encoding of `value` to `buf`
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

/// Number of bytes `value` occupies when VarInt-encoded
#[must_use]
pub fn varint_len(value: i32) -> usize {
    let mut v = value as u32;
    let mut len = 1;
    while v & !0x7F != 0 {
        v >>= 7;
        len += 1;
    }
    len
}
