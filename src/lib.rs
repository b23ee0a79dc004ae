//! minegate: programmable Layer-7 entry gateway for Minecraft Java Edition
//!
//! A single listening endpoint terminates client TCP connections, parses
//! the handshake / status / login prologue, asks an external policy layer
//! where to route, then dials the backend (directly or through SOCKS5,
//! optionally emitting a PROXY Protocol header) and forwards bytes in both
//! directions under per-connection token-bucket rate limits.
//!
//! # Architecture
//!
//! ```text
//! Client → Listener → Connection pipeline → Outbound → Backend
//!                        ↓            ↑
//!                  request queues   decisions
//!                        ↓            ↑
//!                    Policy layer (polls + submits)
//! ```
//!
//! The policy layer never holds engine references: it polls request queues
//! ([`Gateway::poll_events`]) and answers by id
//! ([`Gateway::submit_route_decision`]). Connections suspend on a per-id
//! oneshot channel until their decision lands, a timeout fires, or they are
//! kicked.
//!
//! # Quick start
//!
//! ```no_run
//! use minegate::{Gateway, GatewayConfig, RouteDecision};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::new(&GatewayConfig::default());
//! gateway.start_listener("0.0.0.0", 25565).await?;
//!
//! loop {
//!     let events = gateway.poll_events();
//!     for request in events.route_requests {
//!         let decision = RouteDecision::forward("127.0.0.1", 25566);
//!         let _ = gateway.submit_route_decision(request.conn_id, decision);
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(20)).await;
//! }
//! # }
//! ```
//!
//! # Modules
//!
//! - [`api`]: boundary surface (queues, decisions, listener control, metrics)
//! - [`cache`]: TTL decision cache keyed by client identity
//! - [`config`]: configuration types and loading
//! - [`connection`]: per-connection pipeline and forwarder
//! - [`error`]: error types
//! - [`limiter`]: per-connection token buckets
//! - [`outbound`]: backend dial (direct TCP, SOCKS5)
//! - [`protocol`]: Minecraft wire codec
//! - [`proxy_protocol`]: HAProxy PROXY Protocol v1/v2
//! - [`state`]: process-wide registries and counters

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod limiter;
pub mod listener;
pub mod logging;
pub mod outbound;
pub mod protocol;
pub mod proxy_protocol;
pub mod state;

// Re-export commonly used types at the crate root
pub use api::decision::{
    CacheDirective, CacheGranularity, MotdAction, MotdDecision, MotdStatus, RouteAction,
    RouteDecision, RouteTarget, UpstreamProxy,
};
pub use api::events::{DisconnectionEvent, MotdRequest, PollEvents, RouteRequest};
pub use api::Gateway;
pub use cache::{CacheKind, CacheStats, CachedDecision, DecisionCache};
pub use config::{GatewayConfig, GatewayOptions, ListenerConfig, StaticRouteConfig};
pub use error::{
    ConnectionError, GatewayError, ListenerError, OutboundError, PolicyError, ProtocolError,
    ProxyProtoError, Result,
};
pub use limiter::{ConnectionLimiter, RateLimitSettings};
pub use protocol::{Handshake, NextState};
pub use proxy_protocol::{InboundProxyMode, OutboundProxyVersion, ProxyAddresses};
pub use state::{ConnMetricsSnapshot, GatewayState, MetricsSnapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
