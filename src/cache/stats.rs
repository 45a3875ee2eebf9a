//! Cache Statistics Module
//!
//! Tracks hits per tier, misses, fetches and coalescing.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads answered from memory
    pub memory_hits: u64,
    /// Reads answered from the durable store
    pub durable_hits: u64,
    /// Reads that found no valid entry in either tier
    pub misses: u64,
    /// Fallback fetches started
    pub fetches: u64,
    /// Callers that attached to an already running fetch
    pub coalesced: u64,
    /// Fallback fetches that failed
    pub fetch_failures: u64,
    /// Expired entries purged on discovery
    pub expired_purges: u64,
    /// Durable store errors swallowed
    pub durable_errors: u64,
    /// Current number of entries in memory
    pub total_entries: usize,
    /// Current number of in-flight fetches
    pub in_flight: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses) across both tiers, or 0.0 with no reads.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_memory_hit(&mut self) {
        self.memory_hits += 1;
    }

    pub fn record_durable_hit(&mut self) {
        self.durable_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_fetch(&mut self) {
        self.fetches += 1;
    }

    pub fn record_coalesced(&mut self) {
        self.coalesced += 1;
    }

    pub fn record_fetch_failure(&mut self) {
        self.fetch_failures += 1;
    }

    pub fn record_expired_purge(&mut self) {
        self.expired_purges += 1;
    }

    pub fn record_durable_error(&mut self) {
        self.durable_errors += 1;
    }
}
