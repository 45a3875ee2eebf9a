//! In-Flight Registry Module
//!
//! Tracks fetches that are currently running so concurrent misses for the
//! same key attach to one fetch instead of starting their own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::CacheError;

/// The single result every waiter on a flight receives.
pub type Outcome<V> = Result<V, CacheError>;

/// Identifies one registration, so a superseded fetch cannot settle a newer
/// flight for the same key.
pub type FlightId = u64;

#[derive(Debug)]
struct Flight<V> {
    id: FlightId,
    sender: broadcast::Sender<Outcome<V>>,
}

// == Join Result ==
/// What a caller should do after consulting the registry.
#[derive(Debug)]
pub enum Join<V> {
    /// The value became available before the caller registered
    Ready(V),
    /// Another fetch is running; wait on it
    Follower(broadcast::Receiver<Outcome<V>>),
    /// The caller registered flight `id` and must run the fetch
    Leader {
        id: FlightId,
        receiver: broadcast::Receiver<Outcome<V>>,
    },
    /// Nothing cached, nothing running, and the caller cannot fetch
    Absent,
}

// == In-Flight Registry ==
/// Key to pending-result handle. At most one handle per key.
#[derive(Debug)]
pub struct InFlightRegistry<V> {
    flights: Mutex<HashMap<String, Flight<V>>>,
    next_id: AtomicU64,
}

impl<V: Clone> InFlightRegistry<V> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    // == Join ==
    /// Attaches to the flight for `key`, or registers one when `can_lead`.
    ///
    /// `lookup` runs under the registry lock. A value stored by a flight that
    /// resolved just before this call is therefore seen here, and the caller
    /// never starts a redundant fetch.
    pub fn join<F>(&self, key: &str, can_lead: bool, lookup: F) -> Join<V>
    where
        F: FnOnce() -> Option<V>,
    {
        let mut flights = self.lock();

        if let Some(value) = lookup() {
            return Join::Ready(value);
        }

        if let Some(flight) = flights.get(key) {
            return Join::Follower(flight.sender.subscribe());
        }

        if !can_lead {
            return Join::Absent;
        }

        // A flight sends exactly one message, so capacity 1 never lags.
        let (sender, receiver) = broadcast::channel(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        flights.insert(key.to_string(), Flight { id, sender });
        Join::Leader { id, receiver }
    }

    // == Resolve ==
    /// Delivers `outcome` to every waiter on `key` and clears the flight.
    ///
    /// Returns the number of waiters notified, or `None` when no flight was
    /// registered for `key`.
    pub fn resolve(&self, key: &str, outcome: Outcome<V>) -> Option<usize> {
        let mut flights = self.lock();
        let flight = flights.remove(key)?;
        Some(notify(flight, outcome))
    }

    /// Like [`resolve`](Self::resolve), but only while flight `id` is still
    /// the one registered for `key`.
    ///
    /// Returns `None` when the flight was already settled, for example by an
    /// explicit store, and a newer flight may have taken its place.
    pub fn resolve_flight(&self, key: &str, id: FlightId, outcome: Outcome<V>) -> Option<usize> {
        let mut flights = self.lock();
        if flights.get(key).map(|flight| flight.id) != Some(id) {
            return None;
        }
        let flight = flights.remove(key)?;
        Some(notify(flight, outcome))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every critical section is a single map operation, so a poisoned map is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight<V>>> {
        self.flights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Clone> Default for InFlightRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

// An error from send only means every waiter has gone away.
fn notify<V>(flight: Flight<V>, outcome: Outcome<V>) -> usize {
    flight.sender.send(outcome).unwrap_or(0)
}

// == Wait ==
/// Waits for the single outcome of a flight.
pub async fn wait<V: Clone>(mut receiver: broadcast::Receiver<Outcome<V>>) -> Outcome<V> {
    match receiver.recv().await {
        Ok(outcome) => outcome,
        Err(RecvError::Closed) | Err(RecvError::Lagged(_)) => Err(CacheError::FetchFailed(
            "in-flight fetch ended without a result".to_string(),
        )),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_caller_leads_second_follows() {
        let registry: InFlightRegistry<String> = InFlightRegistry::new();

        assert!(matches!(registry.join("k", true, || None), Join::Leader { .. }));
        assert!(matches!(registry.join("k", true, || None), Join::Follower(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_without_fallback_and_no_flight_is_absent() {
        let registry: InFlightRegistry<String> = InFlightRegistry::new();

        assert!(matches!(registry.join("k", false, || None), Join::Absent));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_follower_without_fallback_still_attaches() {
        let registry: InFlightRegistry<String> = InFlightRegistry::new();
        let _leader = registry.join("k", true, || None);

        assert!(matches!(registry.join("k", false, || None), Join::Follower(_)));
    }

    #[test]
    fn test_lookup_hit_short_circuits() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();

        assert!(matches!(registry.join("k", true, || Some(3)), Join::Ready(3)));
        assert!(!registry.contains("k"));
    }

    #[test]
    fn test_resolve_unknown_key() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();
        assert_eq!(registry.resolve("k", Ok(1)), None);
    }

    #[tokio::test]
    async fn test_resolve_notifies_all_waiters_once() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();

        let Join::Leader { receiver: leader, .. } = registry.join("k", true, || None) else {
            panic!("expected to lead");
        };
        let Join::Follower(follower) = registry.join("k", true, || None) else {
            panic!("expected to follow");
        };

        assert_eq!(registry.resolve("k", Ok(9)), Some(2));
        assert!(!registry.contains("k"));

        assert_eq!(wait(leader).await, Ok(9));
        assert_eq!(wait(follower).await, Ok(9));
    }

    #[tokio::test]
    async fn test_resolve_with_error_reaches_waiters() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();
        let Join::Leader { receiver: leader, .. } = registry.join("k", true, || None) else {
            panic!("expected to lead");
        };

        registry.resolve("k", Err(CacheError::FetchFailed("down".into())));

        assert_eq!(wait(leader).await, Err(CacheError::FetchFailed("down".into())));
        assert!(matches!(registry.join("k", true, || None), Join::Leader { .. }));
    }

    #[tokio::test]
    async fn test_superseded_flight_cannot_settle_its_successor() {
        let registry: InFlightRegistry<u32> = InFlightRegistry::new();

        let Join::Leader { id: first, .. } = registry.join("k", true, || None) else {
            panic!("expected to lead");
        };
        registry.resolve("k", Ok(1));

        let Join::Leader { id: second, receiver } = registry.join("k", true, || None) else {
            panic!("expected to lead");
        };
        assert_ne!(first, second);

        let stale = registry.resolve_flight("k", first, Err(CacheError::FetchFailed("late".into())));
        assert_eq!(stale, None);
        assert!(registry.contains("k"));

        assert_eq!(registry.resolve_flight("k", second, Ok(2)), Some(1));
        assert_eq!(wait(receiver).await, Ok(2));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_failure() {
        let (sender, receiver) = broadcast::channel::<Outcome<u32>>(1);
        drop(sender);

        assert!(matches!(wait(receiver).await, Err(CacheError::FetchFailed(_))));
    }
}
