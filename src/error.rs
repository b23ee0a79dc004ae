//! Error types for minegate
//!
//! This module defines the error hierarchy for the gateway. Errors are
//! categorized by subsystem; the connection pipeline maps them onto the
//! user-visible behaviors (framing errors close silently, policy rejections
//! become Login-Disconnect packets, and so on).

use std::io;

use thiserror::Error;

/// Top-level error type for minegate
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Minecraft wire protocol errors (framing, caps, bad packet ids)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// PROXY Protocol ingest/emit errors
    #[error("PROXY protocol error: {0}")]
    ProxyProto(#[from] ProxyProtoError),

    /// Backend dial errors (direct or SOCKS5)
    #[error("Outbound error: {0}")]
    Outbound(#[from] OutboundError),

    /// Policy boundary errors (pending decisions, submissions)
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Listener lifecycle errors
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Per-connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GatewayError {
    /// Check if this error is recoverable (the operation can be retried
    /// without operator intervention)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Protocol(_) | Self::ProxyProto(_) => false,
            Self::Outbound(e) => e.is_recoverable(),
            Self::Policy(e) => matches!(e, PolicyError::DecisionTimeout),
            Self::Listener(e) => matches!(e, ListenerError::NotFound(_)),
            Self::Connection(e) => matches!(e, ConnectionError::NotFound(_)),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Minecraft wire protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// VarInt continuation ran past the 5-byte maximum
    #[error("VarInt exceeds 5 bytes")]
    VarIntTooLong,

    /// A length-prefixed field exceeded its cap
    #[error("String of {len} bytes exceeds cap of {max}")]
    StringTooLong { len: usize, max: usize },

    /// String bytes were not valid UTF-8
    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    /// Declared packet length is zero, negative, or over the frame cap
    #[error("Packet length {0} is out of range")]
    BadPacketLength(i32),

    /// Wrong packet id for the current protocol state
    #[error("Unexpected packet id {actual:#04x} (expected {expected:#04x})")]
    UnexpectedPacket { expected: i32, actual: i32 },

    /// Handshake `next_state` was neither status (1) nor login (2)
    #[error("Unknown next_state {0}")]
    UnknownNextState(i32),

    /// Packet body ended before all declared fields were read
    #[error("Truncated packet body")]
    Truncated,

    /// Login-start carried an empty username
    #[error("Empty username")]
    EmptyUsername,

    /// Underlying stream error
    #[error("Protocol I/O error: {0}")]
    Io(#[from] io::Error),
}

/// PROXY Protocol errors
#[derive(Debug, Error)]
pub enum ProxyProtoError {
    /// Strict mode and no header was present
    #[error("PROXY header required but not present")]
    MissingHeader,

    /// Mode `none` and the stream opened with a PROXY signature
    #[error("Unexpected PROXY header")]
    UnexpectedHeader,

    /// Header present but malformed
    #[error("Malformed PROXY header: {0}")]
    Malformed(String),

    /// Header longer than the protocol allows
    #[error("PROXY header too long")]
    TooLong,

    /// Underlying stream error
    #[error("PROXY protocol I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyProtoError {
    /// Create a malformed-header error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Backend dial errors
#[derive(Debug, Error)]
pub enum OutboundError {
    /// DNS resolution produced no usable address
    #[error("Failed to resolve {host}")]
    Resolve { host: String },

    /// TCP connect failed
    #[error("Failed to connect to {target}: {reason}")]
    ConnectFailed { target: String, reason: String },

    /// Connect attempt timed out
    #[error("Connection to {target} timed out after {timeout_secs}s")]
    Timeout { target: String, timeout_secs: u64 },

    /// The `proxy` field on a route decision was not a usable socks5 URL
    #[error("Invalid upstream proxy URL: {0}")]
    InvalidProxyUrl(String),

    /// SOCKS5 server spoke a different protocol version
    #[error("Invalid SOCKS version: expected {expected:#04x}, got {actual:#04x}")]
    SocksVersion { expected: u8, actual: u8 },

    /// SOCKS5 server accepted none of our authentication methods
    #[error("No acceptable SOCKS5 authentication method")]
    SocksNoAcceptableMethod,

    /// Username/password sub-negotiation failed
    #[error("SOCKS5 authentication failed")]
    SocksAuthFailed,

    /// SOCKS5 server refused the CONNECT
    #[error("SOCKS5 server error (code {code:#04x}): {message}")]
    SocksReply { code: u8, message: &'static str },

    /// SOCKS5 reply carried an unknown address type
    #[error("Invalid SOCKS5 address type: {0:#04x}")]
    SocksAddressType(u8),

    /// I/O error during dial or negotiation
    #[error("Outbound I/O error: {0}")]
    Io(#[from] io::Error),
}

impl OutboundError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Resolve { .. }
            | Self::ConnectFailed { .. }
            | Self::Timeout { .. }
            | Self::SocksReply { .. } => true,
            Self::InvalidProxyUrl(_)
            | Self::SocksVersion { .. }
            | Self::SocksNoAcceptableMethod
            | Self::SocksAuthFailed
            | Self::SocksAddressType(_) => false,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a connect-failed error
    pub fn connect_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Policy boundary errors
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Submission for a connection id with no pending decision
    ///
    /// Non-fatal: the connection either already received a decision or is
    /// gone. Late submissions are dropped by the engine; this error tells
    /// the caller that happened.
    #[error("No pending decision for connection {0}")]
    NotPending(u64),

    /// No decision arrived within the configured deadline
    #[error("Timed out waiting for decision")]
    DecisionTimeout,

    /// Submitted decision JSON failed to parse or validate
    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    /// The waiting side went away before the decision landed
    #[error("Decision channel closed")]
    ChannelClosed,
}

impl PolicyError {
    /// Create an invalid-decision error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidDecision(msg.into())
    }
}

/// Listener lifecycle errors
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind the listening socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The bind address string did not parse / resolve
    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    /// No listener with that id
    #[error("Listener {0} not found")]
    NotFound(u64),
}

/// Per-connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No connection with that id
    #[error("Connection {0} not found")]
    NotFound(u64),

    /// The connection was cancelled (kick, shutdown)
    #[error("Connection cancelled")]
    Cancelled,

    /// Error during the bidirectional forward loop
    #[error("Transfer error: {0}")]
    Transfer(#[source] io::Error),
}

/// Type alias for Result with [`GatewayError`]
pub type Result<T> = std::result::Result<T, GatewayError>;
