//! Process-wide gateway state
//!
//! One [`GatewayState`] instance owns everything shared across tasks:
//! listener and connection registries, the pending-decision maps, the three
//! boundary event queues, the decision cache, and the global counters. The
//! policy layer never holds references into this state; it names entities
//! by id through the boundary API.

pub mod metrics;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::decision::{MotdDecision, RouteDecision};
use crate::api::events::{DisconnectionEvent, MotdRequest, PollEvents, RouteRequest};
use crate::cache::DecisionCache;
use crate::config::{GatewayConfig, GatewayOptions};
use crate::error::PolicyError;
use crate::limiter::{ConnectionLimiter, RateLimitSettings};
use crate::proxy_protocol::InboundProxyMode;

pub use metrics::{ConnMetrics, ConnMetricsSnapshot, GatewayCounters, MetricsSnapshot};

/// Client identity fields learned during the prologue
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    /// Negotiated protocol version
    pub protocol_version: i32,
    /// Requested host, pre-rewrite
    pub host: String,
    /// Port the client dialed
    pub port: u16,
    /// Username, login path only
    pub username: Option<String>,
}

/// Registry entry for one live connection
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Connection id
    pub id: u64,
    /// Client address (socket peer; PROXY rewrites are tracked separately)
    pub peer_addr: SocketAddr,
    /// Accept timestamp
    pub accepted_at: Instant,
    /// Cancellation handle; kicking fires this
    pub token: CancellationToken,
    /// Per-direction token buckets
    pub limiter: ConnectionLimiter,
    /// Per-connection byte counters
    pub metrics: ConnMetrics,
    /// Identity fields, filled in as the prologue is parsed
    pub identity: Mutex<ClientIdentity>,
}

/// Registry entry for one listener
#[derive(Debug)]
pub struct ListenerEntry {
    /// Listener id
    pub id: u64,
    /// Bound local address
    pub local_addr: SocketAddr,
    /// Inbound PROXY mode in force when the listener started
    pub proxy_mode: InboundProxyMode,
    /// Cancels the accept loop only; extant connections continue
    pub token: CancellationToken,
}

/// Shared state behind every gateway handle
pub struct GatewayState {
    /// Global options (inbound PROXY mode)
    pub options: RwLock<GatewayOptions>,
    /// Live listeners by id
    pub listeners: DashMap<u64, Arc<ListenerEntry>>,
    /// Live connections by id
    pub connections: DashMap<u64, Arc<ConnectionEntry>>,
    /// Oneshot resumption points for connections awaiting a route decision
    pending_routes: DashMap<u64, oneshot::Sender<RouteDecision>>,
    /// Oneshot resumption points for connections awaiting a MOTD decision
    pending_motds: DashMap<u64, oneshot::Sender<MotdDecision>>,
    route_requests: Mutex<VecDeque<RouteRequest>>,
    motd_requests: Mutex<VecDeque<MotdRequest>>,
    disconnection_events: Mutex<VecDeque<DisconnectionEvent>>,
    /// Decision cache shared by all connections
    pub cache: DecisionCache,
    /// Global counters
    pub counters: GatewayCounters,
    /// Default rate limit applied to new connections
    pub global_rate_limit: Mutex<Option<RateLimitSettings>>,
    /// Deadline for policy decisions
    pub decision_timeout: Duration,
    /// Deadline for backend dials
    pub connect_timeout: Duration,
    next_listener_id: AtomicU64,
    next_connection_id: AtomicU64,
}

impl GatewayState {
    /// Create fresh state from configuration
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            options: RwLock::new(config.options.clone()),
            listeners: DashMap::new(),
            connections: DashMap::new(),
            pending_routes: DashMap::new(),
            pending_motds: DashMap::new(),
            route_requests: Mutex::new(VecDeque::new()),
            motd_requests: Mutex::new(VecDeque::new()),
            disconnection_events: Mutex::new(VecDeque::new()),
            cache: DecisionCache::new(),
            counters: GatewayCounters::default(),
            global_rate_limit: Mutex::new(config.global_rate_limit),
            decision_timeout: config.decision_timeout(),
            connect_timeout: config.connect_timeout(),
            next_listener_id: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Mint a listener id
    pub fn next_listener_id(&self) -> u64 {
        self.next_listener_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a freshly accepted connection
    ///
    /// Applies the global default rate limit (if any) and bumps the
    /// counters. The returned entry is already visible in the registry.
    pub fn register_connection(&self, peer_addr: SocketAddr) -> Arc<ConnectionEntry> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let limiter = ConnectionLimiter::new(self.global_rate_limit.lock().as_ref());
        let entry = Arc::new(ConnectionEntry {
            id,
            peer_addr,
            accepted_at: Instant::now(),
            token: CancellationToken::new(),
            limiter,
            metrics: ConnMetrics::default(),
            identity: Mutex::new(ClientIdentity::default()),
        });
        self.connections.insert(id, Arc::clone(&entry));
        self.counters.record_accepted();
        entry
    }

    /// Tear down a connection: drop registry entry, pending decisions, and
    /// emit the disconnection event
    ///
    /// Idempotent; only the call that actually removes the entry emits the
    /// event, so it fires exactly once per connection.
    pub fn finish_connection(&self, conn_id: u64) {
        if let Some((_, entry)) = self.connections.remove(&conn_id) {
            self.pending_routes.remove(&conn_id);
            self.pending_motds.remove(&conn_id);
            self.counters.record_closed();
            self.disconnection_events
                .lock()
                .push_back(DisconnectionEvent { conn_id });
            debug!(
                conn = conn_id,
                lifetime_ms = entry.accepted_at.elapsed().as_millis() as u64,
                "connection finished"
            );
        }
    }

    /// Queue a routing request and wait for the matching decision
    ///
    /// # Errors
    ///
    /// [`PolicyError::DecisionTimeout`] when nothing arrives within the
    /// configured deadline, [`PolicyError::ChannelClosed`] when the engine
    /// is tearing down.
    pub async fn await_route_decision(
        &self,
        request: RouteRequest,
    ) -> Result<RouteDecision, PolicyError> {
        let conn_id = request.conn_id;
        let (tx, rx) = oneshot::channel();
        self.pending_routes.insert(conn_id, tx);
        self.route_requests.lock().push_back(request);

        match tokio::time::timeout(self.decision_timeout, rx).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(_)) => Err(PolicyError::ChannelClosed),
            Err(_) => {
                self.pending_routes.remove(&conn_id);
                Err(PolicyError::DecisionTimeout)
            }
        }
    }

    /// Queue a MOTD request and wait for the matching decision
    ///
    /// # Errors
    ///
    /// Same as [`Self::await_route_decision`].
    pub async fn await_motd_decision(
        &self,
        request: MotdRequest,
    ) -> Result<MotdDecision, PolicyError> {
        let conn_id = request.conn_id;
        let (tx, rx) = oneshot::channel();
        self.pending_motds.insert(conn_id, tx);
        self.motd_requests.lock().push_back(request);

        match tokio::time::timeout(self.decision_timeout, rx).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(_)) => Err(PolicyError::ChannelClosed),
            Err(_) => {
                self.pending_motds.remove(&conn_id);
                Err(PolicyError::DecisionTimeout)
            }
        }
    }

    /// Resume the connection waiting on this routing decision
    ///
    /// # Errors
    ///
    /// [`PolicyError::NotPending`] when no connection is waiting (already
    /// decided, timed out, or gone); non-fatal by contract.
    pub fn submit_route_decision(
        &self,
        conn_id: u64,
        decision: RouteDecision,
    ) -> Result<(), PolicyError> {
        let (_, tx) = self
            .pending_routes
            .remove(&conn_id)
            .ok_or(PolicyError::NotPending(conn_id))?;
        tx.send(decision).map_err(|_| PolicyError::ChannelClosed)
    }

    /// Resume the connection waiting on this MOTD decision
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::submit_route_decision`].
    pub fn submit_motd_decision(
        &self,
        conn_id: u64,
        decision: MotdDecision,
    ) -> Result<(), PolicyError> {
        let (_, tx) = self
            .pending_motds
            .remove(&conn_id)
            .ok_or(PolicyError::NotPending(conn_id))?;
        tx.send(decision).map_err(|_| PolicyError::ChannelClosed)
    }

    /// Drain all three event queues
    pub fn poll_events(&self) -> PollEvents {
        PollEvents {
            route_requests: self.route_requests.lock().drain(..).collect(),
            motd_requests: self.motd_requests.lock().drain(..).collect(),
            disconnection_events: self.disconnection_events.lock().drain(..).collect(),
        }
    }

    /// Snapshot global and per-connection metrics
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let connections = self
            .connections
            .iter()
            .map(|entry| (entry.id, entry.metrics.snapshot()))
            .collect();
        self.counters.snapshot(connections)
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("listeners", &self.listeners.len())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
