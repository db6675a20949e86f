//! In-memory cache store.
//!
//! Entries live in a sharded map. Invalidations bump a logical generation
//! and leave a short-lived tombstone behind so that a read-through load which
//! started before the invalidation cannot store its (now stale) result.
//! Note: Data is lost on process restart.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tollgate_core::LoaderError;
use tollgate_core::TollgateError;
use tollgate_core::domain::{InvalidationEvent, KeyPattern};
use tollgate_core::ports::{Cache, CacheError, CacheStats, Clock};

use super::CacheConfig;
use crate::clock::{saturating_add, saturating_sub};
use super::single_flight::{InFlight, Role};

struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
    access_count: u64,
}

struct Tombstone {
    pattern: KeyPattern,
    generation: u64,
    /// Data read after this instant already reflects the invalidation.
    as_of: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    loads: AtomicU64,
}

/// Where a write came from, for ordering against invalidations.
#[derive(Clone, Copy)]
struct WriteTicket {
    generation: u64,
    started_at: DateTime<Utc>,
}

/// In-memory cache with TTL, capacity eviction, read-through loading and
/// pattern invalidation.
pub struct InMemoryCacheStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
    tombstones: Mutex<Vec<Tombstone>>,
    generation: AtomicU64,
    flights: InFlight<V>,
    counters: Counters,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl<V> InMemoryCacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>, config: CacheConfig) -> Result<Self, TollgateError> {
        config.validate()?;
        Ok(Self {
            entries: DashMap::new(),
            tombstones: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            flights: InFlight::new(),
            counters: Counters::default(),
            clock,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached value, or run `loader` once across all concurrent
    /// callers for `key` and cache its result.
    ///
    /// A loader error is shared with every waiting caller and never cached.
    /// If the leading caller is cancelled or its load times out, one of the
    /// waiting callers takes over with a fresh load.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let guard = loop {
            match self.flights.join(key) {
                Role::Leader(guard) => break guard,
                Role::Follower(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(slot) => slot.clone(),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(result) => return result,
                        None => {
                            tracing::debug!(key = %key, "Load leader went away, retrying");
                            if let Some(value) = self.peek(key) {
                                return Ok(value);
                            }
                        }
                    }
                }
            }
        };

        // Another leader may have finished between our miss and our join.
        if let Some(value) = self.peek(key) {
            guard.complete(Ok(value.clone()));
            return Ok(value);
        }

        let ticket = self.ticket();
        self.counters.loads.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(self.config.load_timeout, loader()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Cache loader failed");
                Err(CacheError::Loader(LoaderError::new(e)))
            }
            Err(_) => {
                // waiters retry with a fresh load instead of sharing the timeout
                drop(guard);
                tracing::warn!(key = %key, timeout = ?self.config.load_timeout, "Cache loader timed out");
                return Err(CacheError::Timeout(self.config.load_timeout));
            }
        };

        if let Ok(value) = &result {
            if !self.store(key, value.clone(), ttl, ticket) {
                tracing::debug!(key = %key, "Loaded value superseded by invalidation");
            }
        }

        guard.complete(result.clone());
        result
    }

    /// Remove expired entries and tombstones no load can still need.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut expired = 0usize;

        self.entries.retain(|_, entry| {
            let live = entry.expires_at > now;
            if !live {
                expired += 1;
            }
            live
        });
        self.counters
            .expirations
            .fetch_add(expired as u64, Ordering::Relaxed);

        let horizon = saturating_sub(now, self.config.load_timeout.saturating_mul(2));
        let mut tombstones = self.lock_tombstones();
        tombstones.retain(|t| t.recorded_at > horizon);
        let kept = tombstones.len();
        drop(tombstones);

        if expired > 0 {
            tracing::debug!(expired, tombstones = kept, "Cache sweep");
        }
        expired
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until `shutdown`
    /// flips to `true`.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(store.config.sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        store.sweep();
                    }
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
            }
            tracing::debug!("Cache sweeper stopped");
        })
    }

    fn ticket(&self) -> WriteTicket {
        WriteTicket {
            generation: self.generation.load(Ordering::SeqCst),
            started_at: self.clock.now(),
        }
    }

    fn lock_tombstones(&self) -> std::sync::MutexGuard<'_, Vec<Tombstone>> {
        self.tombstones.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn peek(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    /// Insert unless an invalidation newer than `ticket` covers `key`.
    fn store(&self, key: &str, value: V, ttl: Option<Duration>, ticket: WriteTicket) -> bool {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);

        {
            // held across check and insert so an invalidation lands fully
            // before or fully after this write
            let tombstones = self.lock_tombstones();
            let superseded = tombstones.iter().any(|t| {
                t.generation > ticket.generation
                    && t.as_of >= ticket.started_at
                    && t.pattern.matches(key)
            });
            if superseded {
                return false;
            }

            self.entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    created_at: ticket.started_at,
                    expires_at: saturating_add(now, ttl),
                    last_access: now,
                    access_count: 0,
                },
            );
        }

        if self.entries.len() > self.config.max_entries {
            self.evict_for_capacity();
        }
        true
    }

    /// Drop least-used entries, then least recently used, until below
    /// capacity with some headroom.
    fn evict_for_capacity(&self) {
        let max = self.config.max_entries;
        let target = max - max / 20;
        let excess = self.entries.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut ranked: Vec<(String, u64, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.access_count, e.last_access))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut evicted = 0u64;
        for (key, _, _) in ranked.into_iter().take(excess) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        tracing::debug!(evicted, size = self.entries.len(), "Capacity eviction");
    }

    /// Record a tombstone, then evict matching entries created at or before
    /// `as_of`.
    fn evict_matching(&self, pattern: KeyPattern, as_of: DateTime<Utc>) -> usize {
        {
            let mut tombstones = self.lock_tombstones();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            tombstones.push(Tombstone {
                pattern: pattern.clone(),
                generation,
                as_of,
                recorded_at: self.clock.now(),
            });
        }

        let mut removed = 0usize;
        self.entries.retain(|key, entry| {
            let evict = entry.created_at <= as_of && pattern.matches(key);
            if evict {
                removed += 1;
            }
            !evict
        });

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::debug!(pattern = %pattern, removed, "Cache invalidation");
        removed
    }
}

#[async_trait]
impl<V> Cache<V> for InMemoryCacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();

        let hit = match self.entries.get_mut(key) {
            Some(mut entry) if entry.expires_at > now => {
                entry.access_count += 1;
                entry.last_access = now;
                Some(entry.value.clone())
            }
            Some(entry) => {
                drop(entry);
                if self
                    .entries
                    .remove_if(key, |_, e| e.expires_at <= now)
                    .is_some()
                {
                    self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
            None => None,
        };

        let counter = if hit.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> bool {
        let ticket = self.ticket();
        self.store(key, value, ttl, ticket)
    }

    async fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.evict_matching(KeyPattern::parse(pattern), self.clock.now())
    }

    async fn apply(&self, event: &InvalidationEvent) -> usize {
        self.evict_matching(event.key_pattern(), event.emitted_at)
    }

    fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            size: self.entries.len(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
        }
    }
}
