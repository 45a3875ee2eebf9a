//! Cache Entry Module
//!
//! Defines the structure for individual in-memory cache entries.

use std::time::Duration;

// == Cache Entry ==
/// A cached value together with its absolute expiry time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry stored at `now_ms` that lives for `max_age`.
    pub fn new(value: V, now_ms: u64, max_age: Duration) -> Self {
        Self {
            value,
            expires_at: expiry_after(now_ms, max_age),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// Boundary condition: the entry stops being valid at its exact expiry
    /// instant, so `now_ms >= expires_at` counts as expired.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        is_expired_at(self.expires_at, now_ms)
    }

    // == Time To Live ==
    /// Returns remaining lifetime in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }
}

// == Utility Functions ==
/// Computes the absolute expiry for a value stored at `now_ms`.
pub fn expiry_after(now_ms: u64, max_age: Duration) -> u64 {
    now_ms.saturating_add(max_age.as_millis() as u64)
}

/// Shared expiry rule for memory entries and durable records.
pub fn is_expired_at(expires_at: u64, now_ms: u64) -> bool {
    now_ms >= expires_at
}
