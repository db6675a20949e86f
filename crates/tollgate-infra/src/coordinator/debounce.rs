//! Coalesces bursts of bus invalidations into single eviction passes.
//!
//! Each pending pattern owns a timer that restarts on every new event for it.
//! An event whose pattern is covered by a pending one folds into it; an event
//! that covers pending patterns absorbs them. When a timer fires the cache is
//! swept once for that pattern and one [`RefreshNotification`] goes out.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use tollgate_core::domain::{
    InvalidationEvent, InvalidationReason, KeyPattern, RefreshNotification,
};
use tollgate_core::ports::{Cache, Clock};

enum Command {
    Event(InvalidationEvent),
    Flush(oneshot::Sender<()>),
}

struct Pending {
    pattern: KeyPattern,
    as_of: DateTime<Utc>,
    reasons: Vec<InvalidationReason>,
    coalesced: usize,
    deadline: Instant,
}

impl Pending {
    fn absorb(&mut self, other: Pending) {
        self.as_of = self.as_of.max(other.as_of);
        self.coalesced += other.coalesced;
        for reason in other.reasons {
            if !self.reasons.contains(&reason) {
                self.reasons.push(reason);
            }
        }
        self.deadline = self.deadline.max(other.deadline);
    }
}

pub(crate) struct Debouncer {
    tx: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub(crate) fn spawn<V>(
        cache: Arc<dyn Cache<V>>,
        clock: Arc<dyn Clock>,
        refresh: broadcast::Sender<RefreshNotification>,
        window: Duration,
    ) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            cache,
            clock,
            refresh,
            window,
            pending: Vec::new(),
        };
        let task = tokio::spawn(driver.run(rx));

        Self {
            tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn submit(&self, event: InvalidationEvent) {
        if self.tx.send(Command::Event(event)).is_err() {
            tracing::debug!("Debouncer stopped, invalidation ignored");
        }
    }

    /// Fire every pending pattern now and wait until done.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Flush, then stop the driver task. Idempotent.
    pub(crate) async fn shutdown(&self) {
        self.flush().await;
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

struct Driver<V> {
    cache: Arc<dyn Cache<V>>,
    clock: Arc<dyn Clock>,
    refresh: broadcast::Sender<RefreshNotification>,
    window: Duration,
    pending: Vec<Pending>,
}

impl<V> Driver<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let next_deadline = self.pending.iter().map(|p| p.deadline).min();

            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Event(event)) => self.enqueue(event),
                    Some(Command::Flush(done)) => {
                        self.fire(None).await;
                        let _ = done.send(());
                    }
                    None => {
                        self.fire(None).await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                    if next_deadline.is_some() =>
                {
                    self.fire(Some(Instant::now())).await;
                }
            }
        }
    }

    fn enqueue(&mut self, event: InvalidationEvent) {
        let incoming = Pending {
            pattern: event.key_pattern(),
            as_of: event.emitted_at,
            reasons: vec![event.reason],
            coalesced: 1,
            deadline: Instant::now() + self.window,
        };

        if let Some(wider) = self
            .pending
            .iter_mut()
            .find(|p| p.pattern.covers(&incoming.pattern))
        {
            wider.absorb(incoming);
            return;
        }

        let (narrower, rest): (Vec<Pending>, Vec<Pending>) = self
            .pending
            .drain(..)
            .partition(|p| incoming.pattern.covers(&p.pattern));
        self.pending = rest;

        let mut merged = incoming;
        for p in narrower {
            merged.absorb(p);
        }
        self.pending.push(merged);
    }

    /// Fire entries due at `now`, or everything when `now` is `None`.
    async fn fire(&mut self, now: Option<Instant>) {
        let (due, waiting): (Vec<Pending>, Vec<Pending>) = self
            .pending
            .drain(..)
            .partition(|p| now.is_none_or(|now| p.deadline <= now));
        self.pending = waiting;

        for p in due {
            let pattern = p.pattern.as_str().map(str::to_string);
            let reason = p
                .reasons
                .last()
                .cloned()
                .unwrap_or(InvalidationReason::Manual);
            let event = InvalidationEvent::new(pattern.clone(), reason, p.as_of);
            let evicted = self.cache.apply(&event).await;

            tracing::debug!(
                pattern = ?pattern,
                coalesced = p.coalesced,
                evicted,
                "Coalesced invalidation applied"
            );

            // no listeners is fine
            let _ = self.refresh.send(RefreshNotification {
                pattern,
                coalesced: p.coalesced,
                reasons: p.reasons,
                emitted_at: self.clock.now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, InMemoryCacheStore};
    use crate::clock::ManualClock;

    fn setup(
        window: Duration,
    ) -> (
        Debouncer,
        Arc<InMemoryCacheStore<u32>>,
        broadcast::Receiver<RefreshNotification>,
        ManualClock,
    ) {
        let clock = ManualClock::default();
        let cache =
            Arc::new(InMemoryCacheStore::new(Arc::new(clock.clone()), CacheConfig::default()).unwrap());
        let (refresh, rx) = broadcast::channel(16);
        let debouncer = Debouncer::spawn(
            cache.clone() as Arc<dyn Cache<u32>>,
            Arc::new(clock.clone()),
            refresh,
            window,
        );
        (debouncer, cache, rx, clock)
    }

    fn event(pattern: Option<&str>, clock: &ManualClock) -> InvalidationEvent {
        InvalidationEvent::new(
            pattern.map(str::to_string),
            InvalidationReason::WritePath,
            clock.now(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_pass() {
        let (debouncer, cache, mut rx, clock) = setup(Duration::from_millis(200));
        cache.set("orders:1", 1, None).await;
        cache.set("orders:2", 2, None).await;
        cache.set("users:1", 3, None).await;

        for _ in 0..5 {
            debouncer.submit(event(Some("orders"), &clock));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // timer keeps restarting while events arrive
        assert_eq!(cache.len(), 3);

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.pattern.as_deref(), Some("orders"));
        assert_eq!(notice.coalesced, 5);
        assert_eq!(notice.reasons, vec![InvalidationReason::WritePath]);
        assert_eq!(cache.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_patterns_merge_into_wider() {
        let (debouncer, _cache, mut rx, clock) = setup(Duration::from_millis(100));

        debouncer.submit(event(Some("orders:1"), &clock));
        debouncer.submit(event(Some("orders:2"), &clock));
        debouncer.submit(event(Some("orders"), &clock));
        debouncer.submit(event(Some("orders:3"), &clock));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.pattern.as_deref(), Some("orders"));
        assert_eq!(notice.coalesced, 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_clear_absorbs_everything() {
        let (debouncer, _cache, mut rx, clock) = setup(Duration::from_millis(100));

        debouncer.submit(event(Some("orders"), &clock));
        debouncer.submit(event(Some("users"), &clock));
        debouncer.submit(event(None, &clock));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.pattern, None);
        assert_eq!(notice.coalesced, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disjoint_patterns_fire_separately() {
        let (debouncer, _cache, mut rx, clock) = setup(Duration::from_millis(100));

        debouncer.submit(event(Some("orders"), &clock));
        debouncer.submit(event(Some("users"), &clock));

        let mut patterns = vec![
            rx.recv().await.unwrap().pattern,
            rx.recv().await.unwrap().pattern,
        ];
        patterns.sort();
        assert_eq!(
            patterns,
            vec![Some("orders".to_string()), Some("users".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending() {
        let (debouncer, cache, mut rx, clock) = setup(Duration::from_secs(60));
        cache.set("orders:1", 1, None).await;

        debouncer.submit(event(Some("orders"), &clock));
        debouncer.shutdown().await;

        assert!(cache.is_empty());
        assert_eq!(rx.try_recv().unwrap().coalesced, 1);

        // idempotent
        debouncer.shutdown().await;
    }
}
