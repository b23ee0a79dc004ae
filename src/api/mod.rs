//! Boundary API
//!
//! [`Gateway`] is the single surface the policy layer (and the driver
//! binary) talks to. It never exposes sockets, tasks, or buckets: only
//! ids, JSON-shaped request/decision types, and counters. Decisions arrive
//! by submission and resume the waiting connection through a per-id oneshot
//! channel; the engine never calls into policy code.

pub mod decision;
pub mod events;

use std::sync::Arc;

use tracing::info;

use crate::cache::CacheStats;
use crate::config::{GatewayConfig, GatewayOptions};
use crate::error::{ConnectionError, ListenerError, PolicyError};
use crate::limiter::RateLimitSettings;
use crate::state::{ConnMetricsSnapshot, GatewayState, MetricsSnapshot};
use crate::{listener, logging};

use decision::{MotdDecision, RouteDecision};
use events::PollEvents;

/// Handle to a running gateway engine
///
/// Cheap to clone; all clones share one [`GatewayState`].
#[derive(Clone, Debug)]
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Create an engine with the given configuration
    ///
    /// No listeners are started; call [`Self::start_listener`].
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            state: Arc::new(GatewayState::new(config)),
        }
    }

    /// Shared state, for in-crate consumers
    pub(crate) fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    // ========================================================================
    // Listener control
    // ========================================================================

    /// Bind a listener and start its accept loop
    ///
    /// # Errors
    ///
    /// [`ListenerError::Bind`] when the address cannot be bound; this is the
    /// fatal-initialization path for the driver.
    pub async fn start_listener(&self, host: &str, port: u16) -> Result<u64, ListenerError> {
        listener::start(Arc::clone(&self.state), host, port).await
    }

    /// Local address a listener is bound to (useful with port 0)
    ///
    /// # Errors
    ///
    /// [`ListenerError::NotFound`] for unknown ids.
    pub fn listener_addr(&self, listener_id: u64) -> Result<std::net::SocketAddr, ListenerError> {
        self.state
            .listeners
            .get(&listener_id)
            .map(|entry| entry.local_addr)
            .ok_or(ListenerError::NotFound(listener_id))
    }

    /// Stop a listener's accept loop; extant connections continue
    ///
    /// # Errors
    ///
    /// [`ListenerError::NotFound`] for unknown ids.
    pub fn stop_listener(&self, listener_id: u64) -> Result<(), ListenerError> {
        let (_, entry) = self
            .state
            .listeners
            .remove(&listener_id)
            .ok_or(ListenerError::NotFound(listener_id))?;
        entry.token.cancel();
        Ok(())
    }

    // ========================================================================
    // Options and rate limits
    // ========================================================================

    /// Replace the global options; connections sample them at accept time
    pub fn set_options(&self, options: GatewayOptions) {
        *self.state.options.write() = options;
        info!("options updated");
    }

    /// [`Self::set_options`] from boundary JSON
    ///
    /// # Errors
    ///
    /// [`PolicyError::InvalidDecision`] on unparseable JSON.
    pub fn set_options_json(&self, json: &str) -> Result<(), PolicyError> {
        let options: GatewayOptions =
            serde_json::from_str(json).map_err(|e| PolicyError::invalid(e.to_string()))?;
        self.set_options(options);
        Ok(())
    }

    /// Replace one connection's rate limits; takes effect on the next
    /// token acquisition
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotFound`] for unknown ids.
    pub fn set_rate_limit(
        &self,
        conn_id: u64,
        settings: RateLimitSettings,
    ) -> Result<(), ConnectionError> {
        let entry = self
            .state
            .connections
            .get(&conn_id)
            .ok_or(ConnectionError::NotFound(conn_id))?;
        entry.limiter.update(&settings);
        info!(
            conn = conn_id,
            send_avg = settings.send_avg,
            send_burst = settings.send_burst,
            recv_avg = settings.recv_avg,
            recv_burst = settings.recv_burst,
            "rate limits updated"
        );
        Ok(())
    }

    /// Install (or clear) the default rate limit for future connections
    ///
    /// Live connections keep whatever they have; per-connection settings
    /// stay authoritative once set.
    pub fn set_global_rate_limit(&self, settings: Option<RateLimitSettings>) {
        *self.state.global_rate_limit.lock() = settings;
    }

    /// Change the log filter at runtime
    #[must_use]
    pub fn set_log_level(&self, filter: &str) -> bool {
        logging::set_level(filter)
    }

    // ========================================================================
    // Connection control
    // ========================================================================

    /// Kick one connection; suspended I/O and token waits abort
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotFound`] for unknown ids.
    pub fn disconnect(&self, conn_id: u64) -> Result<(), ConnectionError> {
        let entry = self
            .state
            .connections
            .get(&conn_id)
            .ok_or(ConnectionError::NotFound(conn_id))?;
        entry.token.cancel();
        let identity = entry.identity.lock();
        info!(
            conn = conn_id,
            user = identity.username.as_deref().unwrap_or("-"),
            host = %identity.host,
            "connection kicked"
        );
        Ok(())
    }

    /// Kick every active connection, returning how many were kicked
    pub fn kick_all(&self) -> usize {
        let mut kicked = 0;
        for entry in self.state.connections.iter() {
            entry.token.cancel();
            kicked += 1;
        }
        info!(count = kicked, "kicked all connections");
        kicked
    }

    /// Cancel all listeners and connections
    ///
    /// Each connection task drains and emits its disconnection event on the
    /// way out; poll afterwards to observe them.
    pub fn shutdown(&self) {
        for entry in self.state.listeners.iter() {
            entry.token.cancel();
        }
        self.state.listeners.clear();
        let kicked = self.kick_all();
        info!(connections = kicked, "gateway shutdown");
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Snapshot global and per-connection counters
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics_snapshot()
    }

    /// Snapshot one connection's counters
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotFound`] for unknown ids.
    pub fn connection_metrics(&self, conn_id: u64) -> Result<ConnMetricsSnapshot, ConnectionError> {
        self.state
            .connections
            .get(&conn_id)
            .map(|entry| entry.metrics.snapshot())
            .ok_or(ConnectionError::NotFound(conn_id))
    }

    // ========================================================================
    // Policy queues
    // ========================================================================

    /// Drain all pending route/MOTD requests and disconnection events
    ///
    /// Returns empty arrays when nothing is pending; callers poll
    /// periodically.
    #[must_use]
    pub fn poll_events(&self) -> PollEvents {
        self.state.poll_events()
    }

    /// Answer a routing request
    ///
    /// # Errors
    ///
    /// [`PolicyError::NotPending`] when the id is no longer waiting, a
    /// non-fatal condition by contract (late or duplicate submission).
    pub fn submit_route_decision(
        &self,
        conn_id: u64,
        decision: RouteDecision,
    ) -> Result<(), PolicyError> {
        self.state.submit_route_decision(conn_id, decision)
    }

    /// [`Self::submit_route_decision`] from boundary JSON
    ///
    /// Unparseable JSON is converted into a reject decision so the waiting
    /// connection never hangs, and the parse error is returned.
    ///
    /// # Errors
    ///
    /// [`PolicyError::InvalidDecision`] on bad JSON, plus the submission
    /// errors.
    pub fn submit_route_decision_json(&self, conn_id: u64, json: &str) -> Result<(), PolicyError> {
        match serde_json::from_str::<RouteDecision>(json) {
            Ok(decision) => self.submit_route_decision(conn_id, decision),
            Err(e) => {
                let _ = self
                    .submit_route_decision(conn_id, RouteDecision::reject("invalid routing decision"));
                Err(PolicyError::invalid(e.to_string()))
            }
        }
    }

    /// Answer a MOTD request
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::submit_route_decision`].
    pub fn submit_motd_decision(
        &self,
        conn_id: u64,
        decision: MotdDecision,
    ) -> Result<(), PolicyError> {
        self.state.submit_motd_decision(conn_id, decision)
    }

    /// [`Self::submit_motd_decision`] from boundary JSON
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::submit_route_decision_json`].
    pub fn submit_motd_decision_json(&self, conn_id: u64, json: &str) -> Result<(), PolicyError> {
        match serde_json::from_str::<MotdDecision>(json) {
            Ok(decision) => self.submit_motd_decision(conn_id, decision),
            Err(e) => {
                let _ = self.submit_motd_decision(
                    conn_id,
                    MotdDecision {
                        disconnect: Some("invalid status decision".to_owned()),
                        ..MotdDecision::default()
                    },
                );
                Err(PolicyError::invalid(e.to_string()))
            }
        }
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    /// Sweep expired cache entries
    pub fn cleanup_cache(&self) {
        self.state.cache.sweep();
    }

    /// Cache statistics snapshot
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.state.cache.stats()
    }
}
