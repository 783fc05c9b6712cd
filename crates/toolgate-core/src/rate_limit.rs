//! Per-tenant token-bucket rate limiting
//!
//! The bucket decision is the only cross-request serialization point in
//! the gateway: each tenant's bucket is updated under its map entry
//! lock so concurrent calls cannot double-spend quota. Execution after
//! the decision is fully concurrent.

use crate::tenant::RateQuota;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of a token-bucket acquisition attempt
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole tokens left after this decision
    pub remaining: u32,
    /// Estimated wait until a token becomes available (zero when allowed)
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter keyed by tenant id
#[derive(Debug, Default)]
pub struct TenantRateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl TenantRateLimiter {
    /// Create a new limiter
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Try to take one token from the tenant's bucket.
    ///
    /// The quota comes from the tenant context on every call, so a
    /// changed quota takes effect on the next request without any
    /// limiter-side invalidation.
    pub fn acquire(&self, tenant_id: &str, quota: &RateQuota) -> RateLimitDecision {
        let capacity = f64::from(quota.max_requests.max(1));
        let refill_per_sec = capacity / quota.interval().as_secs_f64().max(f64::EPSILON);

        let mut bucket = self.buckets.entry(tenant_id.to_string()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: Instant::now(),
        });

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision {
                allowed: true,
                remaining: bucket.tokens as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(deficit / refill_per_sec);
            debug!(tenant = %tenant_id, retry_after_ms = wait.as_millis() as u64, "Rate limit exceeded");
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: wait,
            }
        }
    }

    /// Drop a tenant's bucket (full quota on next request)
    pub fn reset(&self, tenant_id: &str) {
        self.buckets.remove(tenant_id);
    }
}
