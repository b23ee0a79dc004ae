//! PROXY Protocol version 1 (ASCII) codec
//!
//! A v1 header is a single CRLF-terminated line:
//!
//! ```text
//! PROXY TCP4 <src-ip> <dst-ip> <src-port> <dst-port>\r\n
//! PROXY TCP6 <src-ip> <dst-ip> <src-port> <dst-port>\r\n
//! PROXY UNKNOWN[ ...]\r\n
//! ```
//!
//! The longest valid line is 107 bytes including the CRLF.

use std::net::{IpAddr, SocketAddr};

use super::ProxyAddresses;
use crate::error::ProxyProtoError;

/// Longest valid v1 header line including CRLF
pub const MAX_V1_LEN: usize = 107;

/// ASCII prefix common to every v1 header
pub const V1_PREFIX: &[u8] = b"PROXY ";

/// Serialize a v1 header line for the given endpoints
#[must_use]
pub fn encode(addrs: &ProxyAddresses) -> Vec<u8> {
    let family = if addrs.source.is_ipv4() { "TCP4" } else { "TCP6" };
    format!(
        "PROXY {family} {} {} {} {}\r\n",
        addrs.source.ip(),
        addrs.destination.ip(),
        addrs.source.port(),
        addrs.destination.port()
    )
    .into_bytes()
}

/// Parse a complete v1 header line (CRLF included)
///
/// Returns `None` for `PROXY UNKNOWN`, which carries no addresses.
///
/// # Errors
///
/// Returns [`ProxyProtoError::Malformed`] for anything that is not a valid
/// v1 line.
pub fn parse(line: &[u8]) -> Result<Option<ProxyAddresses>, ProxyProtoError> {
    if line.len() > MAX_V1_LEN {
        return Err(ProxyProtoError::TooLong);
    }
    let line = line
        .strip_suffix(b"\r\n")
        .ok_or_else(|| ProxyProtoError::malformed("missing CRLF"))?;
    let line = std::str::from_utf8(line)
        .map_err(|_| ProxyProtoError::malformed("non-ASCII header"))?;

    let mut parts = line.split(' ');
    if parts.next() != Some("PROXY") {
        return Err(ProxyProtoError::malformed("missing PROXY keyword"));
    }

    let family = parts
        .next()
        .ok_or_else(|| ProxyProtoError::malformed("missing protocol family"))?;
    match family {
        "UNKNOWN" => return Ok(None),
        "TCP4" | "TCP6" => {}
        other => {
            return Err(ProxyProtoError::malformed(format!(
                "unsupported family {other}"
            )))
        }
    }

    let src_ip: IpAddr = next_field(&mut parts, "source address")?;
    let dst_ip: IpAddr = next_field(&mut parts, "destination address")?;
    let src_port: u16 = next_field(&mut parts, "source port")?;
    let dst_port: u16 = next_field(&mut parts, "destination port")?;
    if parts.next().is_some() {
        return Err(ProxyProtoError::malformed("trailing fields"));
    }

    if (family == "TCP4") != src_ip.is_ipv4() || src_ip.is_ipv4() != dst_ip.is_ipv4() {
        return Err(ProxyProtoError::malformed("address family mismatch"));
    }

    Ok(Some(ProxyAddresses {
        source: SocketAddr::new(src_ip, src_port),
        destination: SocketAddr::new(dst_ip, dst_port),
    }))
}

fn next_field<'a, T: std::str::FromStr>(
    parts: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<T, ProxyProtoError> {
    parts
        .next()
        .ok_or_else(|| ProxyProtoError::malformed(format!("missing {what}")))?
        .parse()
        .map_err(|_| ProxyProtoError::malformed(format!("invalid {what}")))
}
