//! Per-key coalescing of concurrent read-through loads.
//!
//! The first caller for a key becomes the leader and runs the loader. Later
//! callers subscribe to the leader's outcome. The leader's [`FlightGuard`]
//! removes the in-flight entry on drop, so a cancelled leader never leaves
//! followers waiting on a dead key: their channel closes and they retry.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use tollgate_core::ports::CacheError;

pub(crate) type Outcome<V> = Option<Result<V, CacheError>>;

pub(crate) struct InFlight<V> {
    calls: DashMap<String, (u64, watch::Receiver<Outcome<V>>)>,
    next_id: AtomicU64,
}

pub(crate) enum Role<'a, V> {
    Leader(FlightGuard<'a, V>),
    Follower(watch::Receiver<Outcome<V>>),
}

impl<V: Clone> InFlight<V> {
    pub(crate) fn new() -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn join<'a>(&'a self, key: &str) -> Role<'a, V> {
        match self.calls.entry(key.to_string()) {
            Entry::Occupied(call) => Role::Follower(call.get().1.clone()),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                slot.insert((id, rx));
                Role::Leader(FlightGuard {
                    flights: self,
                    key: key.to_string(),
                    id,
                    tx,
                })
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// RAII leadership over one in-flight load.
pub(crate) struct FlightGuard<'a, V> {
    flights: &'a InFlight<V>,
    key: String,
    id: u64,
    tx: watch::Sender<Outcome<V>>,
}

impl<V> FlightGuard<'_, V> {
    /// Hand the outcome to every follower.
    pub(crate) fn complete(self, outcome: Result<V, CacheError>) {
        self.tx.send_replace(Some(outcome));
    }
}

impl<V> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        self.flights
            .calls
            .remove_if(&self.key, |_, (id, _)| *id == self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_caller_follows_leader() {
        let flights = InFlight::<u32>::new();

        let Role::Leader(guard) = flights.join("k") else {
            panic!("first caller must lead");
        };
        let Role::Follower(mut rx) = flights.join("k") else {
            panic!("second caller must follow");
        };

        guard.complete(Ok(7));

        let outcome = rx.wait_for(Option::is_some).await.unwrap().clone();
        assert_eq!(outcome.unwrap().unwrap(), 7);
        assert_eq!(flights.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers() {
        let flights = InFlight::<u32>::new();

        let Role::Leader(guard) = flights.join("k") else {
            panic!("first caller must lead");
        };
        let Role::Follower(mut rx) = flights.join("k") else {
            panic!("second caller must follow");
        };

        drop(guard);

        assert!(rx.wait_for(Option::is_some).await.is_err());
        assert!(matches!(flights.join("k"), Role::Leader(_)));
    }
}
