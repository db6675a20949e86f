//! The protection-and-freshness facade.
//!
//! A [`Coordinator`] owns one of each component and the background tasks that
//! connect them:
//!
//! - `guard` / `record_outcome` go to the progressive rate limiter;
//! - `cached` reads through the cache store;
//! - the change feed publishes invalidations on the bus, the bus feeds the
//!   debouncer, and the debouncer evicts from the cache and broadcasts
//!   refresh notifications.
//!
//! Construct with [`Coordinator::start`], stop with [`Coordinator::shutdown`].

mod config;
mod debounce;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use tollgate_core::TollgateError;
use tollgate_core::domain::{
    AttemptMetadata, BehaviorSignal, Decision, HealthCheck, HealthStatus, Identifier,
    InvalidationEvent, InvalidationReason, RefreshNotification, SubscriptionState,
};
use tollgate_core::ports::{
    AttemptLog, Cache, CacheStats, ChangeFeedTransport, Clock, InvalidationBus, RateLimiter,
    SubscriptionHandle, handler,
};

use crate::attempt_log::InMemoryAttemptLog;
use crate::cache::InMemoryCacheStore;
use crate::change_feed::ChangeFeedClient;
use crate::clock::SystemClock;
use crate::pubsub::InMemoryInvalidationBus;
use crate::rate_limit::ProgressiveRateLimiter;

pub use config::CoordinatorConfig;
use debounce::Debouncer;

/// External collaborators injected into a [`Coordinator`].
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub attempt_log: Arc<dyn AttemptLog>,
    pub bus: Arc<dyn InvalidationBus>,
    /// No transport means no change feed; caching still works, just without
    /// proactive invalidation.
    pub change_feed: Option<Arc<dyn ChangeFeedTransport>>,
}

impl Collaborators {
    /// Single-process setup: wall clock, in-memory log and bus, no feed.
    pub fn in_memory() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            attempt_log: Arc::new(InMemoryAttemptLog::new()),
            bus: Arc::new(InMemoryInvalidationBus::default()),
            change_feed: None,
        }
    }
}

/// Aggregated health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub subscription: Option<SubscriptionState>,
    pub cache: CacheStats,
}

/// Rate limiting, read-through caching and invalidation behind one handle.
pub struct Coordinator<V = serde_json::Value> {
    limiter: ProgressiveRateLimiter,
    cache: Arc<InMemoryCacheStore<V>>,
    bus: Arc<dyn InvalidationBus>,
    change_feed: Option<ChangeFeedClient>,
    debouncer: Arc<Debouncer>,
    refresh: broadcast::Sender<RefreshNotification>,
    clock: Arc<dyn Clock>,
    stop_sweeper: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    bus_subscription: Mutex<Option<SubscriptionHandle>>,
    closed: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<V> Coordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Validate configuration, build every component and start the
    /// background tasks.
    pub async fn start(
        config: CoordinatorConfig,
        deps: Collaborators,
    ) -> Result<Self, TollgateError> {
        config.validate()?;
        let Collaborators {
            clock,
            attempt_log,
            bus,
            change_feed,
        } = deps;

        let limiter =
            ProgressiveRateLimiter::new(attempt_log, clock.clone(), config.rate_limit.clone())?;
        let cache = Arc::new(InMemoryCacheStore::new(clock.clone(), config.cache.clone())?);
        let (refresh, _) = broadcast::channel(config.refresh_buffer);

        let debouncer = Arc::new(Debouncer::spawn(
            cache.clone() as Arc<dyn Cache<V>>,
            clock.clone(),
            refresh.clone(),
            config.invalidation_coalesce_window,
        ));

        let bus_subscription = {
            let debouncer = debouncer.clone();
            bus.subscribe(handler(move |event| {
                debouncer.submit(event);
                std::future::ready(())
            }))
            .await
            .map_err(|e| TollgateError::TransientBackingStore(e.to_string()))?
        };

        let (stop_sweeper, sweeper_rx) = watch::channel(false);
        let sweeper = cache.spawn_sweeper(sweeper_rx);

        let change_feed = match change_feed {
            Some(transport) => {
                let client = ChangeFeedClient::new(
                    transport,
                    bus.clone(),
                    clock.clone(),
                    config.change_feed.clone(),
                )?;
                client.start();
                Some(client)
            }
            None => {
                tracing::info!("No change feed configured, relying on TTL and direct invalidation");
                None
            }
        };

        tracing::info!(
            max_attempts = config.rate_limit.max_attempts_per_window,
            cache_max_entries = config.cache.max_entries,
            coalesce_window = ?config.invalidation_coalesce_window,
            "Coordinator started"
        );

        Ok(Self {
            limiter,
            cache,
            bus,
            change_feed,
            debouncer,
            refresh,
            clock,
            stop_sweeper,
            sweeper: Mutex::new(Some(sweeper)),
            bus_subscription: Mutex::new(Some(bus_subscription)),
            closed: AtomicBool::new(false),
        })
    }

    /// Decide whether `identifier` may perform `action_type` now.
    pub async fn guard(
        &self,
        identifier: &Identifier,
        action_type: &str,
        signal: Option<&BehaviorSignal>,
    ) -> Decision {
        self.limiter
            .check_and_consume(identifier, action_type, signal)
            .await
    }

    /// Record how a guarded attempt ended. Failures are logged, not returned.
    pub async fn record_outcome(
        &self,
        identifier: &Identifier,
        action_type: &str,
        success: bool,
        metadata: AttemptMetadata,
    ) {
        if let Err(e) = self
            .limiter
            .record_outcome(identifier, action_type, success, metadata)
            .await
        {
            tracing::warn!(
                identifier = %identifier,
                action_type = %action_type,
                error = %e,
                "Failed to record attempt outcome"
            );
        }
    }

    /// Read through the cache. Loader errors reach the caller unchanged.
    pub async fn cached<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<V, TollgateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.cache
            .get_or_load(key, ttl, loader)
            .await
            .map_err(TollgateError::from)
    }

    /// Evict matching keys now and tell every other subscriber.
    pub async fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.invalidate_with(pattern, InvalidationReason::Manual)
            .await
    }

    /// [`invalidate`](Self::invalidate) with an explicit origin.
    pub async fn invalidate_with(
        &self,
        pattern: Option<&str>,
        reason: InvalidationReason,
    ) -> usize {
        let evicted = self.cache.invalidate(pattern).await;

        let event = InvalidationEvent::new(pattern.map(str::to_string), reason, self.clock.now());
        if let Err(e) = self.bus.publish(event).await {
            tracing::warn!(pattern = ?pattern, error = %e, "Failed to publish invalidation");
        }

        evicted
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Direct access to the cache store for `get` / `set`.
    pub fn cache(&self) -> &Arc<InMemoryCacheStore<V>> {
        &self.cache
    }

    pub fn limiter(&self) -> &ProgressiveRateLimiter {
        &self.limiter
    }

    pub fn subscription_state(&self) -> Option<SubscriptionState> {
        self.change_feed.as_ref().map(ChangeFeedClient::state)
    }

    /// Notices sent once a burst of invalidations has been applied.
    pub fn subscribe_refresh(&self) -> broadcast::Receiver<RefreshNotification> {
        self.refresh.subscribe()
    }

    /// Drop attempt records no decision can need anymore.
    pub async fn prune_attempts(&self) -> Result<u64, TollgateError> {
        self.limiter
            .prune()
            .await
            .map_err(|e| TollgateError::TransientBackingStore(e.to_string()))
    }

    pub async fn health(&self) -> HealthReport {
        let mut checks = Vec::with_capacity(4);

        checks.push(match self.limiter.ping().await {
            Ok(()) => HealthCheck::healthy("attempt_log"),
            Err(e) => HealthCheck::unhealthy("attempt_log", e.to_string()),
        });

        checks.push(match &self.change_feed {
            Some(client) => client.health(),
            None => HealthCheck {
                message: Some("not configured".to_string()),
                ..HealthCheck::healthy("change_feed")
            },
        });

        let bus_ended = lock(&self.bus_subscription)
            .as_ref()
            .is_some_and(|sub| sub.is_finished());
        checks.push(if bus_ended && !self.closed.load(Ordering::SeqCst) {
            HealthCheck::degraded("invalidation_bus", "subscription ended")
        } else {
            HealthCheck::healthy("invalidation_bus")
        });

        let cache = self.cache.stats();
        checks.push(HealthCheck {
            message: Some(format!("{} entries", cache.size)),
            ..HealthCheck::healthy("cache")
        });

        HealthReport {
            status: HealthStatus::worst(&checks),
            checks,
            subscription: self.subscription_state(),
            cache,
        }
    }

    /// Close the change feed, flush pending invalidations, then stop the bus
    /// subscription and the sweeper. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Coordinator shutting down");

        if let Some(client) = &self.change_feed {
            client.shutdown().await;
        }

        let subscription = lock(&self.bus_subscription).take();
        if let Some(subscription) = subscription {
            subscription.close().await;
        }

        self.debouncer.shutdown().await;

        self.stop_sweeper.send_replace(true);
        let sweeper = lock(&self.sweeper).take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::error!(error = %e, "Cache sweeper panicked");
            }
        }

        tracing::info!("Coordinator stopped");
    }
}
