//! Keyed single-flight map
//!
//! At most one computation per key is in flight. The first caller for a key
//! supplies the future; every later caller for that key receives a clone of
//! the same [`Shared`] handle and awaits its result. Entries stay until they
//! are explicitly forgotten, so a resolved result keeps being handed out.
//!
//! The map does no locking of its own: its owner keeps it behind the same
//! mutex that guards the state the results feed into.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

/// A cloneable handle to one in-flight computation
pub type Flight<V> = Shared<BoxFuture<'static, V>>;

/// Map from key to the computation currently producing its value
pub struct Flights<K, V: Clone> {
    inflight: HashMap<K, Flight<V>>,
}

impl<K, V> Flights<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: HashMap::new(),
        }
    }

    /// Join the flight for `key`, starting it with `start` if none exists.
    ///
    /// Returns the shared handle and whether this call created it. `start`
    /// is only invoked when no flight exists; the returned future is lazy
    /// and runs when awaited.
    pub fn join<F, Fut>(&mut self, key: K, start: F) -> (Flight<V>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        if let Some(existing) = self.inflight.get(&key) {
            return (existing.clone(), false);
        }
        let flight = start().boxed().shared();
        self.inflight.insert(key, flight.clone());
        (flight, true)
    }

    /// Drop the entry for `key` unconditionally
    pub fn forget(&mut self, key: &K) -> bool {
        self.inflight.remove(key).is_some()
    }

    /// Drop the entry for `key` only if it is still `flight`
    ///
    /// Used after a failed flight so that a newer flight started by someone
    /// else is left alone.
    pub fn forget_if_same(&mut self, key: &K, flight: &Flight<V>) -> bool {
        match self.inflight.get(key) {
            Some(current) if current.ptr_eq(flight) => {
                self.inflight.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inflight.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn clear(&mut self) {
        self.inflight.clear();
    }
}

impl<K, V> Default for Flights<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
