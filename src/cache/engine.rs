//! Cache Engine Module
//!
//! Two-tier cache (memory, then durable store) with lazy expiry and request
//! coalescing for misses.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::durable::{DurableRecord, DurableStore};
use crate::cache::inflight::{self, FlightId, InFlightRegistry, Join};
use crate::cache::{CacheEntry, CacheStats, DEFAULT_MAX_AGE};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result, StoreError};

// == Cache Value ==
/// Bound for anything the engine can hold and persist.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Memory,
    Durable,
}

struct Shared<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    inflight: InFlightRegistry<V>,
    durable: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    default_max_age: Duration,
    stats: Mutex<CacheStats>,
}

// == Cache Engine ==
/// Handle to a cache instance. Cloning is cheap and every clone shares the
/// same state, so build one at startup and hand clones to whoever needs it.
///
/// Lock order is registry, then entries, then stats. `set` releases the
/// entries lock before it touches the registry.
pub struct CacheEngine<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for CacheEngine<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> fmt::Debug for CacheEngine<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("default_max_age", &self.shared.default_max_age)
            .finish_non_exhaustive()
    }
}

impl<V: CacheValue> CacheEngine<V> {
    // == Constructors ==
    /// Creates an engine on the system clock with the default max age.
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self::with_clock(durable, Arc::new(SystemClock), DEFAULT_MAX_AGE)
    }

    /// Creates an engine with an explicit clock and default max age.
    pub fn with_clock(
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        default_max_age: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                inflight: InFlightRegistry::new(),
                durable,
                clock,
                default_max_age,
                stats: Mutex::new(CacheStats::new()),
            }),
        }
    }

    pub fn default_max_age(&self) -> Duration {
        self.shared.default_max_age
    }

    // == Has ==
    /// Returns true if either tier holds a valid entry for `key`.
    ///
    /// Expired entries found along the way are purged.
    pub fn has(&self, key: &str) -> bool {
        self.memory_value(key).is_some() || self.durable_record(key).is_some()
    }

    // == Get Value ==
    /// Synchronous read of memory, then the durable store. Never fetches.
    pub fn get_value(&self, key: &str) -> Option<V> {
        match self.lookup(key) {
            Some((value, tier)) => {
                self.record_hit(key, tier);
                Some(value)
            }
            None => {
                self.stats_guard().record_miss();
                None
            }
        }
    }

    // == Get ==
    /// Returns the cached value, or waits on a fetch another caller started.
    ///
    /// Fails with [`CacheError::CacheMiss`] when neither is available.
    pub async fn get(&self, key: &str) -> Result<V> {
        self.resolve(key, None::<NoFetch<V>>, None).await
    }

    // == Get With Fallback ==
    /// Returns the cached value, or runs `fallback` to produce it.
    ///
    /// Concurrent callers for the same key share one execution of the first
    /// caller's fallback; later fallbacks are dropped without being polled.
    /// A successful result is stored for `max_age` (engine default if `None`).
    /// A failure reaches every waiter as [`CacheError::FetchFailed`] and
    /// leaves the key free for a retry.
    ///
    /// The fallback runs on its own task, so it completes even if every
    /// caller stops waiting.
    pub async fn get_with<F, E>(&self, key: &str, fallback: F, max_age: Option<Duration>) -> Result<V>
    where
        F: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.resolve(key, Some(fallback), max_age).await
    }

    // == Set ==
    /// Stores `value` for the default max age.
    pub fn set(&self, key: &str, value: V) {
        self.set_with_max_age(key, value, self.shared.default_max_age);
    }

    /// Stores `value` in memory and the durable store, then hands it to every
    /// caller waiting on a fetch for `key`.
    pub fn set_with_max_age(&self, key: &str, value: V, max_age: Duration) {
        self.store(key, &value, max_age);

        if let Some(notified) = self.shared.inflight.resolve(key, Ok(value)) {
            debug!("Resolved in-flight fetch for '{}', notified {} waiter(s)", key, notified);
        }
    }

    // == Introspection ==
    /// Number of entries held in memory, expired ones not yet purged included.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.shared.inflight.contains(key)
    }

    /// Returns a snapshot of the engine statistics.
    pub fn stats(&self) -> CacheStats {
        let total_entries = self.len();
        let in_flight = self.shared.inflight.len();
        let mut stats = self.stats_guard().clone();
        stats.total_entries = total_entries;
        stats.in_flight = in_flight;
        stats
    }

    // == Internals ==
    async fn resolve<F, E>(&self, key: &str, fallback: Option<F>, max_age: Option<Duration>) -> Result<V>
    where
        F: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if let Some((value, tier)) = self.lookup(key) {
            self.record_hit(key, tier);
            return Ok(value);
        }

        let join = self
            .shared
            .inflight
            .join(key, fallback.is_some(), || self.memory_value(key));

        match join {
            Join::Ready(value) => {
                self.record_hit(key, Tier::Memory);
                Ok(value)
            }
            Join::Follower(receiver) => {
                {
                    let mut stats = self.stats_guard();
                    stats.record_miss();
                    stats.record_coalesced();
                }
                debug!("Attached to in-flight fetch for '{}'", key);
                inflight::wait(receiver).await
            }
            Join::Leader { id, receiver } => {
                let Some(fallback) = fallback else {
                    // join() only lets callers with a fallback lead.
                    let miss = CacheError::CacheMiss(key.to_string());
                    self.shared.inflight.resolve_flight(key, id, Err(miss.clone()));
                    return Err(miss);
                };
                {
                    let mut stats = self.stats_guard();
                    stats.record_miss();
                    stats.record_fetch();
                }
                debug!("Starting fetch for '{}'", key);
                self.spawn_fetch(key, id, fallback, max_age.unwrap_or(self.shared.default_max_age));
                inflight::wait(receiver).await
            }
            Join::Absent => {
                self.stats_guard().record_miss();
                debug!("Cache miss for '{}' with no fallback", key);
                Err(CacheError::CacheMiss(key.to_string()))
            }
        }
    }

    fn spawn_fetch<F, E>(&self, key: &str, id: FlightId, fallback: F, max_age: Duration)
    where
        F: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let engine = self.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            // The inner task isolates panics so the flight is always cleared.
            match tokio::spawn(fallback).await {
                Ok(Ok(value)) => engine.complete_flight(&key, id, value, max_age),
                Ok(Err(e)) => engine.fail_flight(&key, id, e.to_string()),
                Err(join_error) => {
                    engine.fail_flight(&key, id, format!("fetch task aborted: {}", join_error))
                }
            }
        });
    }

    // The value is stored even when the flight was already settled, so the
    // latest completed write wins. Waiters are only notified on their own
    // flight.
    fn complete_flight(&self, key: &str, id: FlightId, value: V, max_age: Duration) {
        self.store(key, &value, max_age);

        match self.shared.inflight.resolve_flight(key, id, Ok(value)) {
            Some(notified) => debug!("Fetch for '{}' completed, notified {} waiter(s)", key, notified),
            None => debug!("Fetch for '{}' completed after its flight was settled", key),
        }
    }

    fn fail_flight(&self, key: &str, id: FlightId, reason: String) {
        warn!("Fetch for '{}' failed: {}", key, reason);
        self.stats_guard().record_fetch_failure();
        let settled = self
            .shared
            .inflight
            .resolve_flight(key, id, Err(CacheError::FetchFailed(reason)));
        if settled.is_none() {
            debug!("Failed fetch for '{}' had already been settled", key);
        }
    }

    fn store(&self, key: &str, value: &V, max_age: Duration) {
        let entry = CacheEntry::new(value.clone(), self.now(), max_age);
        let expires_at = entry.expires_at;
        self.entries().insert(key.to_string(), entry);

        self.persist(key, value, expires_at);
    }

    fn lookup(&self, key: &str) -> Option<(V, Tier)> {
        if let Some(value) = self.memory_value(key) {
            return Some((value, Tier::Memory));
        }
        // Durable hits are not copied back into memory.
        self.durable_value(key).map(|value| (value, Tier::Durable))
    }

    fn record_hit(&self, key: &str, tier: Tier) {
        let mut stats = self.stats_guard();
        match tier {
            Tier::Memory => stats.record_memory_hit(),
            Tier::Durable => stats.record_durable_hit(),
        }
        debug!("Cache hit for '{}' ({:?})", key, tier);
    }

    fn memory_value(&self, key: &str) -> Option<V> {
        let now = self.now();
        let mut entries = self.entries();
        let entry = entries.get(key)?;
        if !entry.is_expired(now) {
            return Some(entry.value.clone());
        }

        entries.remove(key);
        drop(entries);
        self.stats_guard().record_expired_purge();
        debug!("Purged expired memory entry '{}'", key);
        None
    }

    fn durable_record(&self, key: &str) -> Option<DurableRecord> {
        let record = match self.shared.durable.read(key) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!("Durable read for '{}' failed, treating as absent: {}", key, e);
                self.stats_guard().record_durable_error();
                return None;
            }
        };

        if !record.is_expired(self.now()) {
            return Some(record);
        }

        self.stats_guard().record_expired_purge();
        if let Err(e) = self.shared.durable.remove(key) {
            warn!("Failed to remove expired durable record '{}': {}", key, e);
            self.stats_guard().record_durable_error();
        }
        None
    }

    fn durable_value(&self, key: &str) -> Option<V> {
        let record = self.durable_record(key)?;
        match serde_json::from_value(record.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Durable record '{}' does not decode, treating as absent: {}", key, e);
                self.stats_guard().record_durable_error();
                None
            }
        }
    }

    fn persist(&self, key: &str, value: &V, expires_at: u64) {
        let result = serde_json::to_value(value)
            .map_err(StoreError::from)
            .and_then(|json| {
                self.shared
                    .durable
                    .write(key, &DurableRecord::new(json, expires_at))
            });

        if let Err(e) = result {
            warn!("Durable write for '{}' skipped: {}", key, e);
            self.stats_guard().record_durable_error();
        }
    }

    fn now(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    // Each critical section leaves the map consistent, so poisoning is ignored.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stats_guard(&self) -> MutexGuard<'_, CacheStats> {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fallback type for the no-fallback form of `get`; never constructed.
type NoFetch<V> = std::future::Pending<std::result::Result<V, CacheError>>;
