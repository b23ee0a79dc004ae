//! Gateway counters and metrics snapshots
//!
//! All counters are atomic; snapshots are taken without locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-connection byte counters
#[derive(Debug, Default)]
pub struct ConnMetrics {
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
}

impl ConnMetrics {
    /// Add client→backend bytes
    pub fn add_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Add backend→client bytes
    pub fn add_recv(&self, n: u64) {
        self.bytes_recv.fetch_add(n, Ordering::Relaxed);
    }

    /// Client→backend total
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Backend→client total
    #[must_use]
    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv.load(Ordering::Relaxed)
    }

    /// Point-in-time copy
    #[must_use]
    pub fn snapshot(&self) -> ConnMetricsSnapshot {
        ConnMetricsSnapshot {
            bytes_sent: self.bytes_sent(),
            bytes_recv: self.bytes_recv(),
        }
    }
}

/// Snapshot of one connection's counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnMetricsSnapshot {
    /// Client→backend bytes
    pub bytes_sent: u64,
    /// Backend→client bytes
    pub bytes_recv: u64,
}

/// Process-wide counters
#[derive(Debug, Default)]
pub struct GatewayCounters {
    total_conn: AtomicU64,
    active_conn: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_recv: AtomicU64,
}

impl GatewayCounters {
    /// Record an accepted connection
    pub fn record_accepted(&self) {
        self.total_conn.fetch_add(1, Ordering::Relaxed);
        self.active_conn.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection
    pub fn record_closed(&self) {
        self.active_conn.fetch_sub(1, Ordering::Relaxed);
    }

    /// Add client→backend bytes to the global total
    pub fn add_sent(&self, n: u64) {
        self.total_bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Add backend→client bytes to the global total
    pub fn add_recv(&self, n: u64) {
        self.total_bytes_recv.fetch_add(n, Ordering::Relaxed);
    }

    /// Currently active connections
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active_conn.load(Ordering::Relaxed)
    }

    /// Total connections ever accepted
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total_conn.load(Ordering::Relaxed)
    }

    /// Build the full snapshot given the per-connection map
    #[must_use]
    pub fn snapshot(&self, connections: HashMap<u64, ConnMetricsSnapshot>) -> MetricsSnapshot {
        MetricsSnapshot {
            total_conn: self.total_conn.load(Ordering::Relaxed),
            active_conn: self.active_conn.load(Ordering::Relaxed),
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_recv: self.total_bytes_recv.load(Ordering::Relaxed),
            connections,
        }
    }
}

/// Full metrics snapshot as returned by the boundary API
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Total connections ever accepted
    pub total_conn: u64,
    /// Currently active connections
    pub active_conn: u64,
    /// Global client→backend byte total
    pub total_bytes_sent: u64,
    /// Global backend→client byte total
    pub total_bytes_recv: u64,
    /// Per-connection counters keyed by connection id
    pub connections: HashMap<u64, ConnMetricsSnapshot>,
}
