//! Per-connection action limiting using a token bucket.

use crate::connection::ConnectionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Token bucket rate limiter keyed by connection.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<ConnectionId, TokenBucket>>>,
    capacity: f64,
    refill_per_second: f64,
    blocked_count: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `per_second` tokens are restored every second, up to
    /// `per_second + burst`.
    pub fn new(per_second: u32, burst: u32) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            capacity: f64::from(per_second.saturating_add(burst)),
            refill_per_second: f64::from(per_second),
            blocked_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Takes one token for `connection_id`; `false` means drop the action.
    pub async fn check_rate_limit(&self, connection_id: ConnectionId) -> bool {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();

        let bucket = buckets.entry(connection_id).or_insert(TokenBucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            self.blocked_count.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub async fn forget(&self, connection_id: ConnectionId) {
        self.buckets.write().await.remove(&connection_id);
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked_count.load(Ordering::Relaxed)
    }
}
