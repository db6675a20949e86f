use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::InvalidationEvent;
use crate::error::{LoaderError, TollgateError};

/// Cache trait - abstraction over read-side cache stores.
///
/// Read-through loading is generic over the loader future, so it lives on
/// the concrete store rather than on this object-safe trait.
#[async_trait]
pub trait Cache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Get a live value. Expired entries are never returned.
    async fn get(&self, key: &str) -> Option<V>;

    /// Store a value with an optional TTL (store default when `None`).
    ///
    /// Returns `false` when an invalidation that began after this call
    /// superseded the write.
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> bool;

    /// Evict every key matching `pattern`; `None` clears the store.
    /// Returns the number of evicted entries.
    async fn invalidate(&self, pattern: Option<&str>) -> usize;

    /// Apply an invalidation event, evicting only entries created at or
    /// before the event's `emitted_at`.
    async fn apply(&self, event: &InvalidationEvent) -> usize;

    /// Current statistics.
    fn stats(&self) -> CacheStats;
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Entries removed by capacity eviction.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
    /// Loader invocations performed by read-through.
    pub loads: u64,
}

/// Cache operation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("Load timed out after {0:?}")]
    Timeout(Duration),
}

impl From<CacheError> for TollgateError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Loader(e) => TollgateError::Loader(e),
            CacheError::Timeout(d) => {
                TollgateError::TransientBackingStore(format!("load timed out after {d:?}"))
            }
        }
    }
}
