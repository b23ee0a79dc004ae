//! PROXY Protocol version 2 (binary) codec
//!
//! A v2 header starts with a fixed 12-byte signature, then:
//!
//! ```text
//! +-----------+---------------+--------------+------------------+
//! | ver | cmd | fam  | proto  |   length     |    addresses     |
//! +-----------+---------------+--------------+------------------+
//! |   1 byte  |    1 byte     | u16 (BE)     |  `length` bytes  |
//! +-----------+---------------+--------------+------------------+
//! ```
//!
//! For `AF_INET`/STREAM the address block is src-ip, dst-ip, src-port,
//! dst-port (12 bytes); for `AF_INET6` the same with 16-byte addresses
//! (36 bytes). Anything after the address block is TLV data and is skipped.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::ProxyAddresses;
use crate::error::ProxyProtoError;

/// The 12-byte v2 signature
pub const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Fixed part of the header: signature + ver/cmd + fam/proto + length
pub const V2_HEADER_LEN: usize = 16;

/// Version nibble (high) for v2
const VERSION_2: u8 = 0x20;

/// LOCAL command: connection originated by the proxy itself, no addresses
const CMD_LOCAL: u8 = 0x00;

/// PROXY command: addresses describe the original connection
const CMD_PROXY: u8 = 0x01;

/// `AF_INET` / STREAM family byte
const FAM_TCP4: u8 = 0x11;

/// `AF_INET6` / STREAM family byte
const FAM_TCP6: u8 = 0x21;

/// Address block length for `AF_INET`
const ADDR_LEN_V4: usize = 12;

/// Address block length for `AF_INET6`
const ADDR_LEN_V6: usize = 36;

/// Serialize a v2 PROXY header (command PROXY, protocol STREAM)
#[must_use]
pub fn encode(addrs: &ProxyAddresses) -> Vec<u8> {
    let mut header = Vec::with_capacity(V2_HEADER_LEN + ADDR_LEN_V6);
    header.extend_from_slice(&V2_SIGNATURE);
    header.push(VERSION_2 | CMD_PROXY);

    match (addrs.source.ip(), addrs.destination.ip()) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            header.push(FAM_TCP4);
            header.extend_from_slice(&(ADDR_LEN_V4 as u16).to_be_bytes());
            header.extend_from_slice(&src.octets());
            header.extend_from_slice(&dst.octets());
        }
        (src, dst) => {
            header.push(FAM_TCP6);
            header.extend_from_slice(&(ADDR_LEN_V6 as u16).to_be_bytes());
            header.extend_from_slice(&to_v6(src).octets());
            header.extend_from_slice(&to_v6(dst).octets());
        }
    }
    header.extend_from_slice(&addrs.source.port().to_be_bytes());
    header.extend_from_slice(&addrs.destination.port().to_be_bytes());
    header
}

/// Parse the address block following a validated 16-byte fixed header
///
/// `ver_cmd` and `fam_proto` are bytes 13 and 14 of the header; `payload`
/// is the declared-length block after it. Returns `None` when the header
/// carries no usable TCP addresses (LOCAL command, `AF_UNSPEC`, `AF_UNIX`,
/// or a datagram protocol).
///
/// # Errors
///
/// Returns [`ProxyProtoError::Malformed`] on version mismatch or an address
/// block shorter than its family requires.
pub fn parse(
    ver_cmd: u8,
    fam_proto: u8,
    payload: &[u8],
) -> Result<Option<ProxyAddresses>, ProxyProtoError> {
    if ver_cmd & 0xF0 != VERSION_2 {
        return Err(ProxyProtoError::malformed(format!(
            "bad v2 version byte {ver_cmd:#04x}"
        )));
    }
    match ver_cmd & 0x0F {
        CMD_PROXY => {}
        CMD_LOCAL => return Ok(None),
        other => {
            return Err(ProxyProtoError::malformed(format!(
                "bad v2 command {other:#03x}"
            )))
        }
    }

    match fam_proto {
        FAM_TCP4 => {
            if payload.len() < ADDR_LEN_V4 {
                return Err(ProxyProtoError::malformed("short AF_INET address block"));
            }
            let src_ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
            let dst_ip = Ipv4Addr::new(payload[4], payload[5], payload[6], payload[7]);
            let src_port = u16::from_be_bytes([payload[8], payload[9]]);
            let dst_port = u16::from_be_bytes([payload[10], payload[11]]);
            Ok(Some(ProxyAddresses {
                source: SocketAddr::new(IpAddr::V4(src_ip), src_port),
                destination: SocketAddr::new(IpAddr::V4(dst_ip), dst_port),
            }))
        }
        FAM_TCP6 => {
            if payload.len() < ADDR_LEN_V6 {
                return Err(ProxyProtoError::malformed("short AF_INET6 address block"));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[0..16]);
            let src_ip = Ipv6Addr::from(octets);
            octets.copy_from_slice(&payload[16..32]);
            let dst_ip = Ipv6Addr::from(octets);
            let src_port = u16::from_be_bytes([payload[32], payload[33]]);
            let dst_port = u16::from_be_bytes([payload[34], payload[35]]);
            Ok(Some(ProxyAddresses {
                source: SocketAddr::new(IpAddr::V6(src_ip), src_port),
                destination: SocketAddr::new(IpAddr::V6(dst_ip), dst_port),
            }))
        }
        // AF_UNSPEC, AF_UNIX, or datagram protocols: no TCP address to use
        _ => Ok(None),
    }
}

fn to_v6(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}
