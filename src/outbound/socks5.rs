//! SOCKS5 client (RFC 1928, RFC 1929)
//!
//! Dials the backend through an upstream SOCKS5 relay. Only what the
//! gateway needs is implemented: the NoAuth and username/password methods,
//! and the CONNECT command against an IPv4, IPv6, or domain target.
//!
//! Flow:
//! 1. Greeting: `VER NMETHODS METHODS...`
//! 2. Method selection: `VER METHOD`
//! 3. Optional RFC 1929 sub-negotiation
//! 4. `CONNECT` request with the destination address
//! 5. Reply with result code and bound address
//!
//! After a successful reply the stream is a raw pipe to the destination.

use std::net::IpAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::direct;
use crate::api::decision::UpstreamProxy;
use crate::error::OutboundError;

/// SOCKS protocol version
const SOCKS5_VERSION: u8 = 0x05;

/// No authentication required
const AUTH_METHOD_NONE: u8 = 0x00;

/// Username/password authentication (RFC 1929)
const AUTH_METHOD_PASSWORD: u8 = 0x02;

/// Server accepted none of the offered methods
const AUTH_METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// RFC 1929 sub-negotiation version
const AUTH_PASSWORD_VERSION: u8 = 0x01;

/// CONNECT command
const CMD_CONNECT: u8 = 0x01;

/// IPv4 address type
const ATYP_IPV4: u8 = 0x01;

/// Domain address type
const ATYP_DOMAIN: u8 = 0x03;

/// IPv6 address type
const ATYP_IPV6: u8 = 0x04;

/// CONNECT succeeded
const REPLY_SUCCEEDED: u8 = 0x00;

/// Human-readable text for a reply code
#[must_use]
pub const fn reply_message(code: u8) -> &'static str {
    match code {
        0x00 => "succeeded",
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

/// Connect to `target_host:target_port` through `proxy`
///
/// The whole dial (TCP connect plus negotiation) runs under `deadline`.
///
/// # Errors
///
/// TCP-level failures surface as [`OutboundError::ConnectFailed`] /
/// [`OutboundError::Timeout`]; protocol failures as the `Socks*` variants.
pub async fn connect(
    proxy: &UpstreamProxy,
    target_host: &str,
    target_port: u16,
    deadline: Duration,
) -> Result<TcpStream, OutboundError> {
    let mut stream = direct::connect(&proxy.host, proxy.port, deadline).await?;

    let target = format!("{target_host}:{target_port}");
    timeout(
        deadline,
        negotiate(&mut stream, proxy, target_host, target_port),
    )
    .await
    .map_err(|_| OutboundError::Timeout {
        target: target.clone(),
        timeout_secs: deadline.as_secs(),
    })??;

    debug!(proxy = %proxy.host, %target, "SOCKS5 tunnel established");
    Ok(stream)
}

async fn negotiate(
    stream: &mut TcpStream,
    proxy: &UpstreamProxy,
    target_host: &str,
    target_port: u16,
) -> Result<(), OutboundError> {
    // Greeting: offer password auth only when we hold credentials.
    let greeting: &[u8] = if proxy.auth.is_some() {
        &[SOCKS5_VERSION, 2, AUTH_METHOD_NONE, AUTH_METHOD_PASSWORD]
    } else {
        &[SOCKS5_VERSION, 1, AUTH_METHOD_NONE]
    };
    stream.write_all(greeting).await?;

    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await?;
    if selection[0] != SOCKS5_VERSION {
        return Err(OutboundError::SocksVersion {
            expected: SOCKS5_VERSION,
            actual: selection[0],
        });
    }
    match selection[1] {
        AUTH_METHOD_NONE => {}
        AUTH_METHOD_PASSWORD => {
            let Some((username, password)) = &proxy.auth else {
                return Err(OutboundError::SocksNoAcceptableMethod);
            };
            authenticate(stream, username, password).await?;
        }
        // Covers AUTH_METHOD_NO_ACCEPTABLE and anything else we never offered.
        _ => return Err(OutboundError::SocksNoAcceptableMethod),
    }

    // CONNECT request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = Vec::with_capacity(7 + target_host.len());
    request.extend_from_slice(&[SOCKS5_VERSION, CMD_CONNECT, 0x00]);
    match target_host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if target_host.len() > 255 {
                return Err(OutboundError::connect_failed(
                    target_host,
                    "domain name longer than 255 bytes",
                ));
            }
            request.push(ATYP_DOMAIN);
            request.push(target_host.len() as u8);
            request.extend_from_slice(target_host.as_bytes());
        }
    }
    request.extend_from_slice(&target_port.to_be_bytes());
    stream.write_all(&request).await?;

    // Reply: VER REP RSV ATYP BND.ADDR BND.PORT
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(OutboundError::SocksVersion {
            expected: SOCKS5_VERSION,
            actual: reply[0],
        });
    }
    if reply[1] != REPLY_SUCCEEDED {
        return Err(OutboundError::SocksReply {
            code: reply[1],
            message: reply_message(reply[1]),
        });
    }

    // Drain the bound address; its content is irrelevant to us.
    let addr_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => usize::from(stream.read_u8().await?),
        other => return Err(OutboundError::SocksAddressType(other)),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

async fn authenticate(
    stream: &mut TcpStream,
    username: &str,
    password: &str,
) -> Result<(), OutboundError> {
    if username.len() > 255 || password.len() > 255 {
        return Err(OutboundError::SocksAuthFailed);
    }
    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(AUTH_PASSWORD_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    stream.write_all(&request).await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[1] != 0x00 {
        return Err(OutboundError::SocksAuthFailed);
    }
    Ok(())
}
