//! Single-flight deduplication by cache key.
//!
//! The first cacheable item for a key becomes the flight leader and proceeds
//! through the pipeline. Items with the same key that arrive while the
//! leader is in flight are parked here until the leader finishes.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

/// Result of registering an item for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupResult {
    /// No flight for this key; the caller must enqueue the item.
    Leader,
    /// Parked behind the current leader at `position` (0-based).
    Parked { position: usize },
}

struct Flight<T> {
    leader: u64,
    waiters: VecDeque<T>,
}

/// Waiting registry keyed by cache key.
///
/// A present key (even with no waiters) means a flight is active.
pub struct WaitingRegistry<T> {
    flights: Mutex<HashMap<String, Flight<T>>>,
}

impl<T> WaitingRegistry<T> {
    pub fn new() -> Self {
        Self { flights: Mutex::new(HashMap::new()) }
    }

    /// Start a flight for `key` led by `sequence`, or park `item` behind the
    /// existing one.
    pub fn register(&self, key: &str, sequence: u64, item: T) -> DedupResult {
        let mut flights = self.flights.lock();
        match flights.get_mut(key) {
            Some(flight) => {
                flight.waiters.push_back(item);
                DedupResult::Parked { position: flight.waiters.len() - 1 }
            }
            None => {
                flights.insert(
                    key.to_string(),
                    Flight { leader: sequence, waiters: VecDeque::new() },
                );
                DedupResult::Leader
            }
        }
    }

    /// End the flight for `key` if `sequence` leads it, handing back the
    /// parked items in arrival order.
    ///
    /// Returns `None` when `sequence` is not the current leader, so a
    /// released sibling finishing later cannot end someone else's flight.
    pub fn release(&self, key: &str, sequence: u64) -> Option<VecDeque<T>> {
        let mut flights = self.flights.lock();
        if flights.get(key)?.leader != sequence {
            return None;
        }
        flights.remove(key).map(|f| f.waiters)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.flights.lock().contains_key(key)
    }

    /// Number of items parked behind `key`, if a flight is active.
    pub fn waiting(&self, key: &str) -> Option<usize> {
        self.flights.lock().get(key).map(|f| f.waiters.len())
    }

    /// Number of active flights.
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.lock().is_empty()
    }
}

impl<T> Default for WaitingRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
