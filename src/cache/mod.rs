//! Decision cache
//!
//! Memoizes routing and MOTD decisions by client identity so repeat
//! connections skip the policy round-trip. Entries are keyed by request
//! kind plus `ip` or `ip:host` (host lowercased), expire after the TTL the
//! policy asked for, and are evicted lazily on lookup. A full sweep is
//! available but optional.
//!
//! There is no single-flight deduplication: two concurrent misses may both
//! reach the policy layer, and the last decision cached wins.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::api::decision::{CacheDirective, CacheGranularity, MotdStatus, RouteAction};

/// Which request type an entry answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Routing decision
    Route,
    /// MOTD decision
    Motd,
}

impl CacheKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Motd => "motd",
        }
    }
}

/// Cached decision payload
#[derive(Debug, Clone)]
pub enum CachedDecision {
    /// A routing action (forward or reject) as the policy returned it
    Route(RouteAction),
    /// A status document; `"auto"` fields stay unresolved so hits keep
    /// tracking live values
    Motd(Box<MotdStatus>),
    /// An explicit cached rejection
    Rejection {
        /// Disconnect reason for login-path hits
        reason: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: CachedDecision,
    expires_at: Instant,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    /// Entries currently in the map, expired included
    pub total_entries: usize,
    /// Entries past their expiry that a sweep would remove
    pub expired_entries: usize,
}

/// Concurrent TTL cache for routing and MOTD decisions
#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: DashMap<String, CacheEntry>,
}

impl DecisionCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: CacheKind, granularity: CacheGranularity, ip: &str, host: &str) -> String {
        match granularity {
            CacheGranularity::Ip => format!("{}:ip:{ip}", kind.prefix()),
            CacheGranularity::IpHost => {
                format!("{}:ip:{ip}:host:{}", kind.prefix(), host.to_lowercase())
            }
        }
    }

    /// Look up a live entry for this request
    ///
    /// Probes the `ip:host` key first, then the plain `ip` key; the first
    /// non-expired entry wins. Expired entries found along the way are
    /// removed.
    #[must_use]
    pub fn get(&self, kind: CacheKind, ip: &str, host: &str) -> Option<CachedDecision> {
        for granularity in [CacheGranularity::IpHost, CacheGranularity::Ip] {
            let key = Self::key(kind, granularity, ip, host);
            if let Some(entry) = self.entries.get(&key) {
                if entry.expires_at > Instant::now() {
                    return Some(entry.payload.clone());
                }
                // Release the shard read guard before removing, or the
                // remove can deadlock against it.
                drop(entry);
                self.entries.remove(&key);
            }
        }
        None
    }

    /// Store a decision under the directive's granularity and TTL
    ///
    /// A directive with `reject: true` stores a rejection carrying
    /// `reject_reason` instead of the payload.
    pub fn insert(
        &self,
        kind: CacheKind,
        ip: &str,
        host: &str,
        payload: CachedDecision,
        directive: &CacheDirective,
    ) {
        let payload = if directive.reject.unwrap_or(false) {
            CachedDecision::Rejection {
                reason: directive.reject_reason.clone(),
            }
        } else {
            payload
        };
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + Duration::from_millis(directive.ttl),
        };
        self.entries
            .insert(Self::key(kind, directive.granularity, ip, host), entry);
    }

    /// Remove every expired entry
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        CacheStats {
            total_entries: self.entries.len(),
            expired_entries: self
                .entries
                .iter()
                .filter(|entry| entry.expires_at <= now)
                .count(),
        }
    }
}
