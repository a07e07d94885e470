//! Per-identity rate limiting
//!
//! This module provides one token bucket per authenticated identity. A bucket
//! holds `quota` tokens and refills continuously at `quota` tokens per minute.
//! When the effective quota of an identity changes, its bucket is discarded and
//! rebuilt full under the new quota.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Interval over which a full quota refills
pub const REFILL_INTERVAL: Duration = Duration::from_secs(60);

/// Token bucket with continuous refill
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Available tokens
    tokens: f64,

    /// Maximum tokens (bucket capacity)
    capacity: f64,

    /// Token refill rate per second
    refill_per_sec: f64,

    /// Last time tokens were refilled
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket for a per-minute quota
    pub fn new(quota_per_minute: u32, now: Instant) -> Self {
        let capacity = quota_per_minute as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity / REFILL_INTERVAL.as_secs_f64(),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Try to take one token. Never waits.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens available at `now`
    pub fn available(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }
}

/// Limiter state for one identity
#[derive(Debug)]
struct LimiterEntry {
    /// Quota the bucket was built for
    quota_per_minute: i64,
    bucket: TokenBucket,
}

/// Registry of per-identity token buckets
///
/// All access goes through a single mutex; the lock is held across the bucket
/// decision so two concurrent requests for one identity can never spend the
/// same token.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    entries: Mutex<HashMap<i64, LimiterEntry>>,
}

impl RateLimiterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, LimiterEntry>> {
        // A panic while holding the lock cannot leave a bucket half-updated
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide whether `identity_id` may make one more request
    ///
    /// A quota of zero or less means unlimited and is not tracked.
    pub fn allow(&self, identity_id: i64, quota_per_minute: i64) -> bool {
        self.allow_at(identity_id, quota_per_minute, Instant::now())
    }

    /// Same as `allow` with an explicit clock reading
    pub fn allow_at(&self, identity_id: i64, quota_per_minute: i64, now: Instant) -> bool {
        if quota_per_minute <= 0 {
            return true;
        }

        let mut entries = self.lock();
        let entry = entries
            .entry(identity_id)
            .or_insert_with(|| LimiterEntry {
                quota_per_minute,
                bucket: TokenBucket::new(capacity(quota_per_minute), now),
            });

        if entry.quota_per_minute != quota_per_minute {
            tracing::debug!(
                identity_id,
                old_quota = entry.quota_per_minute,
                new_quota = quota_per_minute,
                "Quota changed, rebuilding limiter"
            );
            *entry = LimiterEntry {
                quota_per_minute,
                bucket: TokenBucket::new(capacity(quota_per_minute), now),
            };
        }

        entry.bucket.try_acquire(now)
    }

    /// Drop the limiter of an identity (e.g., after deletion)
    pub fn remove(&self, identity_id: i64) {
        self.lock().remove(&identity_id);
    }

    /// Remove all limiters
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Get current number of tracked identities
    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }
}

fn capacity(quota_per_minute: i64) -> u32 {
    u32::try_from(quota_per_minute).unwrap_or(u32::MAX)
}
