//! Cache Module
//!
//! Provides a two-tier cache with time-based expiry, a durable fallback
//! store and coalescing of concurrent misses.

pub mod durable;
mod engine;
mod entry;
mod inflight;
mod stats;


use std::time::Duration;

// Re-export public types
pub use durable::{DurableRecord, DurableStore, FileStore, MemoryStore, NullStore};
pub use engine::{CacheEngine, CacheValue};
pub use entry::CacheEntry;
pub use inflight::{InFlightRegistry, Join, Outcome};
pub use stats::CacheStats;

// == Public Constants ==
/// Lifetime of entries stored without an explicit max age
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(60_000);
