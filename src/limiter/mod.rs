//! Per-connection rate limiting
//!
//! Every connection carries two independent token buckets: `send` meters
//! bytes flowing from the client toward the backend (accounted on the
//! client-read side), `recv` meters the opposite direction. A bucket is a
//! governor quota of `avg` bytes per second with `burst` bytes of
//! accumulation; an average of zero means unlimited.
//!
//! The forwarder acquires tokens in chunks of at most [`RATE_CHUNK`] bytes
//! before each write. Parameter updates swap the bucket atomically and take
//! effect on the next acquisition.

use std::num::NonZeroU32;
use std::sync::Arc;

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

/// Largest token acquisition (and forwarder chunk) in bytes
pub const RATE_CHUNK: usize = 4096;

type TokenBucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// The four-tuple the rate-limit setter takes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// Average client→backend bytes per second; 0 = unlimited
    pub send_avg: u64,
    /// Client→backend burst bytes; 0 = same as `send_avg`
    pub send_burst: u64,
    /// Average backend→client bytes per second; 0 = unlimited
    pub recv_avg: u64,
    /// Backend→client burst bytes; 0 = same as `recv_avg`
    pub recv_burst: u64,
}

impl RateLimitSettings {
    /// Unlimited in both directions
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            send_avg: 0,
            send_burst: 0,
            recv_avg: 0,
            recv_burst: 0,
        }
    }
}

/// One direction's bucket, None when unlimited
struct Slot {
    bucket: Option<TokenBucket>,
    burst: u32,
}

impl Slot {
    fn build(avg: u64, burst: u64) -> Self {
        let Some(avg) = NonZeroU32::new(u32::try_from(avg).unwrap_or(u32::MAX)) else {
            return Self {
                bucket: None,
                burst: u32::MAX,
            };
        };
        let burst = NonZeroU32::new(u32::try_from(burst).unwrap_or(u32::MAX)).unwrap_or(avg);
        Self {
            bucket: Some(RateLimiter::direct(
                Quota::per_second(avg).allow_burst(burst),
            )),
            burst: burst.get(),
        }
    }

    fn unlimited() -> Self {
        Self {
            bucket: None,
            burst: u32::MAX,
        }
    }

    async fn acquire(&self, bytes: usize) {
        let Some(bucket) = &self.bucket else { return };
        // Requests are clamped to the burst so the quota can always satisfy
        // them; long-run throughput is still bounded by the average rate.
        let want = u32::try_from(bytes.min(RATE_CHUNK)).unwrap_or(u32::MAX).min(self.burst);
        if let Some(want) = NonZeroU32::new(want) {
            let _ = bucket.until_n_ready(want).await;
        } else {
            let _ = bucket.until_n_ready(nonzero!(1u32)).await;
        }
    }
}

/// Two reconfigurable token buckets for one connection
pub struct ConnectionLimiter {
    send: ArcSwap<Slot>,
    recv: ArcSwap<Slot>,
}

impl ConnectionLimiter {
    /// Create with the given settings, or unlimited when `None`
    #[must_use]
    pub fn new(settings: Option<&RateLimitSettings>) -> Self {
        match settings {
            Some(s) => Self {
                send: ArcSwap::from_pointee(Slot::build(s.send_avg, s.send_burst)),
                recv: ArcSwap::from_pointee(Slot::build(s.recv_avg, s.recv_burst)),
            },
            None => Self {
                send: ArcSwap::from_pointee(Slot::unlimited()),
                recv: ArcSwap::from_pointee(Slot::unlimited()),
            },
        }
    }

    /// Replace both buckets; in-flight acquisitions finish against the old
    /// parameters, the next acquisition sees the new ones
    pub fn update(&self, settings: &RateLimitSettings) {
        self.send
            .store(Arc::new(Slot::build(settings.send_avg, settings.send_burst)));
        self.recv
            .store(Arc::new(Slot::build(settings.recv_avg, settings.recv_burst)));
    }

    /// Acquire tokens for client→backend bytes, waiting for replenishment
    /// when the bucket is depleted
    pub async fn acquire_send(&self, bytes: usize) {
        self.send.load_full().acquire(bytes).await;
    }

    /// Acquire tokens for backend→client bytes
    pub async fn acquire_recv(&self, bytes: usize) {
        self.recv.load_full().acquire(bytes).await;
    }

    /// Whether either direction currently has a bucket configured
    #[must_use]
    pub fn is_limited(&self) -> bool {
        self.send.load().bucket.is_some() || self.recv.load().bucket.is_some()
    }
}

impl std::fmt::Debug for ConnectionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLimiter")
            .field("limited", &self.is_limited())
            .finish()
    }
}
