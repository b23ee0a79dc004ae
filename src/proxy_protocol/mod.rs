//! HAProxy PROXY Protocol support
//!
//! Inbound, a listener may run in one of three modes: `none` (a PROXY
//! signature at the start of the stream is a framing error), `optional`
//! (a header is honored when present) or `strict` (a header is required).
//! A parsed header rewrites the client address used for policy requests and
//! logging; it is otherwise non-authoritative.
//!
//! Outbound, the gateway emits a v1 line or v2 binary header toward the
//! backend when the routing decision asks for one.

pub mod v1;
pub mod v2;

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::error::ProxyProtoError;

/// Endpoint pair carried by a PROXY header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyAddresses {
    /// Original client endpoint
    pub source: SocketAddr,
    /// Endpoint the client connected to
    pub destination: SocketAddr,
}

/// Inbound PROXY Protocol handling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InboundProxyMode {
    /// No header expected; a PROXY signature is a framing error
    #[default]
    None,
    /// Header honored when present, plain streams pass through
    Optional,
    /// Header required; its absence is a framing error
    Strict,
}

impl std::fmt::Display for InboundProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Optional => write!(f, "optional"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// Outbound PROXY header version requested by a routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundProxyVersion {
    /// ASCII v1 line
    V1,
    /// Binary v2 header
    V2,
}

impl OutboundProxyVersion {
    /// Create from the wire value (1 or 2)
    #[must_use]
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// Serialize a header of this version for the given endpoints
    #[must_use]
    pub fn encode(self, addrs: &ProxyAddresses) -> Vec<u8> {
        match self {
            Self::V1 => v1::encode(addrs),
            Self::V2 => v2::encode(addrs),
        }
    }
}

/// What a peek at the start of a stream revealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detection {
    /// Stream starts with the v1 ASCII prefix
    V1,
    /// Stream starts with the v2 signature
    V2,
    /// Stream does not start with either signature
    Absent,
    /// Buffered bytes are a proper prefix of a signature
    Inconclusive,
}

fn detect(buf: &[u8]) -> Detection {
    if buf.is_empty() {
        return Detection::Inconclusive;
    }
    let v2_len = buf.len().min(v2::V2_SIGNATURE.len());
    if buf[..v2_len] == v2::V2_SIGNATURE[..v2_len] {
        return if v2_len == v2::V2_SIGNATURE.len() {
            Detection::V2
        } else {
            Detection::Inconclusive
        };
    }
    let v1_len = buf.len().min(v1::V1_PREFIX.len());
    if buf[..v1_len] == v1::V1_PREFIX[..v1_len] {
        return if v1_len == v1::V1_PREFIX.len() {
            Detection::V1
        } else {
            Detection::Inconclusive
        };
    }
    Detection::Absent
}

/// Ingest an inbound PROXY header according to `mode`
///
/// On success returns the parsed addresses (if a header carrying TCP
/// addresses was consumed) and leaves the stream positioned at the first
/// byte after the header. With no header present in `optional` mode the
/// stream is untouched.
///
/// # Errors
///
/// Mode violations surface as [`ProxyProtoError::UnexpectedHeader`] /
/// [`ProxyProtoError::MissingHeader`]; parse failures as
/// [`ProxyProtoError::Malformed`].
pub async fn read_inbound(
    stream: &mut TcpStream,
    mode: InboundProxyMode,
) -> Result<Option<ProxyAddresses>, ProxyProtoError> {
    let mut peek_buf = [0u8; v2::V2_SIGNATURE.len()];
    let n = stream.peek(&mut peek_buf).await?;
    if n == 0 {
        return Err(ProxyProtoError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before any data",
        )));
    }

    match (detect(&peek_buf[..n]), mode) {
        (Detection::V1 | Detection::V2, InboundProxyMode::None) => {
            Err(ProxyProtoError::UnexpectedHeader)
        }
        (_, InboundProxyMode::None) => Ok(None),
        (Detection::V1, _) => read_v1(stream).await,
        (Detection::V2, _) => read_v2(stream).await,
        (Detection::Absent | Detection::Inconclusive, InboundProxyMode::Strict) => {
            Err(ProxyProtoError::MissingHeader)
        }
        (Detection::Absent | Detection::Inconclusive, InboundProxyMode::Optional) => Ok(None),
    }
}

/// Consume and parse a v1 line off the stream
async fn read_v1(stream: &mut TcpStream) -> Result<Option<ProxyAddresses>, ProxyProtoError> {
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = stream.read_u8().await?;
        line.push(byte);
        if byte == b'\n' {
            break;
        }
        if line.len() >= v1::MAX_V1_LEN {
            return Err(ProxyProtoError::TooLong);
        }
    }
    v1::parse(&line)
}

/// Consume and parse a v2 header off the stream
async fn read_v2(stream: &mut TcpStream) -> Result<Option<ProxyAddresses>, ProxyProtoError> {
    let mut fixed = [0u8; v2::V2_HEADER_LEN];
    stream.read_exact(&mut fixed).await?;
    if fixed[..12] != v2::V2_SIGNATURE {
        return Err(ProxyProtoError::malformed("v2 signature mismatch"));
    }
    let len = u16::from_be_bytes([fixed[14], fixed[15]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    v2::parse(fixed[12], fixed[13], &payload)
}
