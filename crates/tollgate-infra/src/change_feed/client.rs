//! Reconnecting change-feed client.
//!
//! A single control loop owns the connection:
//!
//! ```text
//! Connecting ──ok──▶ Connected ──drop──▶ Backoff ──delay──▶ Connecting
//!     │                                     ▲
//!     └──────────────fail / timeout─────────┘
//! ```
//!
//! Every failed attempt bumps `attempt`; a successful connect resets it.
//! Past `max_reconnect_attempts` the loop stays in `Backoff` with
//! `exhausted` set until shutdown. Any state moves to `Closed` on shutdown.
//!
//! Received notifications are translated to invalidations and pushed onto a
//! drop-oldest queue. A separate publisher task drains it onto the bus, so a
//! slow bus never stalls the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tollgate_core::TollgateError;
use tollgate_core::domain::{
    ChangeNotification, HealthCheck, InvalidationEvent, SubscriptionState, SubscriptionStatus,
};
use tollgate_core::ports::{ChangeFeedError, ChangeFeedTransport, Clock, InvalidationBus};

use super::ChangeFeedConfig;
use crate::clock::saturating_add;
use super::queue::DropOldestQueue;

struct Inner {
    transport: Arc<dyn ChangeFeedTransport>,
    bus: Arc<dyn InvalidationBus>,
    clock: Arc<dyn Clock>,
    config: ChangeFeedConfig,
    state: watch::Sender<SubscriptionState>,
    shutdown: watch::Sender<bool>,
    queue: DropOldestQueue<InvalidationEvent>,
}

/// Subscribes to a change feed and republishes it as invalidations.
pub struct ChangeFeedClient {
    inner: Arc<Inner>,
    started: AtomicBool,
    control: Mutex<Option<JoinHandle<()>>>,
    publisher: Mutex<Option<JoinHandle<()>>>,
}

enum Disconnect {
    Failed,
    Shutdown,
}

impl ChangeFeedClient {
    pub fn new(
        transport: Arc<dyn ChangeFeedTransport>,
        bus: Arc<dyn InvalidationBus>,
        clock: Arc<dyn Clock>,
        config: ChangeFeedConfig,
    ) -> Result<Self, TollgateError> {
        config.validate()?;
        let (state, _) = watch::channel(SubscriptionState::default());
        let (shutdown, _) = watch::channel(false);
        let queue = DropOldestQueue::new(config.queue_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                bus,
                clock,
                config,
                state,
                shutdown,
                queue,
            }),
            started: AtomicBool::new(false),
            control: Mutex::new(None),
            publisher: Mutex::new(None),
        })
    }

    /// Spawn the control loop and the publisher. Calling twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Change feed client already started");
            return;
        }

        tracing::info!(
            source = %self.inner.transport.describe(),
            max_attempts = self.inner.config.max_reconnect_attempts,
            "Starting change feed client"
        );

        let control = tokio::spawn(run(self.inner.clone()));
        let publisher = tokio::spawn(publish(self.inner.clone()));

        *lock(&self.control) = Some(control);
        *lock(&self.publisher) = Some(publisher);
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.state.borrow().clone()
    }

    /// Follow state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.inner.state.subscribe()
    }

    /// Invalidations lost to queue overflow.
    pub fn dropped_notifications(&self) -> u64 {
        self.inner.queue.dropped()
    }

    /// `Err(SubscriptionExhausted)` once retries are used up.
    pub fn ensure_healthy(&self) -> Result<(), TollgateError> {
        let state = self.state();
        if state.exhausted {
            return Err(TollgateError::SubscriptionExhausted {
                attempts: state.attempt,
            });
        }
        Ok(())
    }

    pub fn health(&self) -> HealthCheck {
        let state = self.state();
        let component = "change_feed";

        if let Err(e) = self.ensure_healthy() {
            return HealthCheck::degraded(component, e.to_string());
        }
        match state.status {
            SubscriptionStatus::Connected => HealthCheck::healthy(component),
            SubscriptionStatus::Connecting => HealthCheck::degraded(component, "connecting"),
            SubscriptionStatus::Backoff => HealthCheck::degraded(
                component,
                format!("reconnecting (attempt {})", state.attempt),
            ),
            SubscriptionStatus::Closed => HealthCheck::degraded(component, "closed"),
        }
    }

    /// Stop the control loop, drain the queue onto the bus and wait for both
    /// tasks. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let control = lock(&self.control).take();
        if let Some(handle) = control {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Change feed control loop panicked");
            }
        }

        self.inner.queue.close();
        let publisher = lock(&self.publisher).take();
        if let Some(handle) = publisher {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Change feed publisher panicked");
            }
        }

        self.inner.set_state(SubscriptionState {
            status: SubscriptionStatus::Closed,
            next_retry_at: None,
            ..self.state()
        });
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn set_state(&self, state: SubscriptionState) {
        tracing::debug!(status = ?state.status, attempt = state.attempt, "Change feed state");
        self.state.send_replace(state);
    }

    fn enqueue(&self, notification: ChangeNotification) {
        for event in notification.invalidations() {
            if self.queue.push(event) {
                tracing::warn!(
                    dropped_total = self.queue.dropped(),
                    "Invalidation queue full, dropped oldest"
                );
            }
        }
    }
}

async fn run(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let config = &inner.config;
    let mut attempt: u32 = 0;

    loop {
        inner.set_state(SubscriptionState::connecting(attempt));

        let connect = tokio::time::timeout(config.connect_timeout, inner.transport.connect());
        let connected = tokio::select! {
            result = connect => result,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        match connected {
            Ok(Ok(mut stream)) => {
                attempt = 0;
                inner.set_state(SubscriptionState {
                    status: SubscriptionStatus::Connected,
                    attempt,
                    next_retry_at: None,
                    exhausted: false,
                });
                tracing::info!(source = %inner.transport.describe(), "Change feed connected");

                let outcome = loop {
                    tokio::select! {
                        next = stream.next() => match next {
                            Some(Ok(notification)) => inner.enqueue(notification),
                            Some(Err(ChangeFeedError::Decode(reason))) => {
                                tracing::warn!(reason = %reason, "Skipping malformed change notification");
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "Change feed connection failed");
                                break Disconnect::Failed;
                            }
                            None => {
                                tracing::warn!("Change feed connection dropped");
                                break Disconnect::Failed;
                            }
                        },
                        _ = shutdown.wait_for(|stop| *stop) => break Disconnect::Shutdown,
                    }
                };
                if matches!(outcome, Disconnect::Shutdown) {
                    break;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(attempt = attempt + 1, error = %e, "Change feed connect failed");
            }
            Err(_) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    timeout = ?config.connect_timeout,
                    "Change feed connect timed out"
                );
            }
        }

        attempt = attempt.saturating_add(1);

        if attempt > config.max_reconnect_attempts {
            inner.set_state(SubscriptionState {
                status: SubscriptionStatus::Backoff,
                attempt,
                next_retry_at: None,
                exhausted: true,
            });
            tracing::error!(
                attempts = attempt,
                "Change feed retries exhausted, caching continues without invalidation feed"
            );
            let _ = shutdown.wait_for(|stop| *stop).await;
            break;
        }

        let delay = config.reconnect_delay;
        let next_retry_at = saturating_add(inner.clock.now(), delay);
        inner.set_state(SubscriptionState {
            status: SubscriptionStatus::Backoff,
            attempt,
            next_retry_at: Some(next_retry_at),
            exhausted: false,
        });

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }

    tracing::info!("Change feed client stopped");
}

async fn publish(inner: Arc<Inner>) {
    while let Some(event) = inner.queue.pop().await {
        let pattern = event.pattern.clone();
        if let Err(e) = inner.bus.publish(event).await {
            tracing::warn!(pattern = ?pattern, error = %e, "Failed to publish invalidation");
        }
    }
    tracing::debug!("Change feed publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::mpsc;
    use tollgate_core::domain::{ChangeOperation, HealthStatus};
    use tollgate_core::ports::handler;

    use crate::change_feed::ChannelTransport;
    use crate::clock::SystemClock;
    use crate::pubsub::InMemoryInvalidationBus;

    fn config() -> ChangeFeedConfig {
        ChangeFeedConfig {
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(2),
            queue_capacity: 16,
        }
    }

    fn client(transport: &ChannelTransport, bus: Arc<InMemoryInvalidationBus>) -> ChangeFeedClient {
        ChangeFeedClient::new(
            Arc::new(transport.clone()),
            bus,
            Arc::new(SystemClock),
            config(),
        )
        .unwrap()
    }

    async fn wait_until(
        client: &ChangeFeedClient,
        predicate: impl FnMut(&SubscriptionState) -> bool,
    ) -> SubscriptionState {
        client
            .watch_state()
            .wait_for(predicate)
            .await
            .unwrap()
            .clone()
    }

    fn update(keys: &[&str]) -> ChangeNotification {
        ChangeNotification {
            entity: "orders".to_string(),
            operation: ChangeOperation::Update,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_reach_the_bus() {
        let transport = ChannelTransport::new();
        let bus = Arc::new(InMemoryInvalidationBus::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus
            .subscribe(handler(move |event: InvalidationEvent| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event.pattern);
                }
            }))
            .await
            .unwrap();

        let client = client(&transport, bus);
        client.start();
        wait_until(&client, |s| s.status == SubscriptionStatus::Connected).await;

        assert!(transport.send(update(&["42", "43"])));

        assert_eq!(rx.recv().await.unwrap(), Some("orders:42".to_string()));
        assert_eq!(rx.recv().await.unwrap(), Some("orders:43".to_string()));
        assert_eq!(client.health().status, HealthStatus::Healthy);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let transport = ChannelTransport::new();
        transport.fail_next(u32::MAX);
        let client = client(&transport, Arc::new(InMemoryInvalidationBus::default()));

        client.start();
        let state = wait_until(&client, |s| s.exhausted).await;

        assert_eq!(state.status, SubscriptionStatus::Backoff);
        assert_eq!(state.attempt, 4);
        assert_eq!(transport.connect_count(), 4);
        assert!(matches!(
            client.ensure_healthy(),
            Err(TollgateError::SubscriptionExhausted { attempts: 4 })
        ));
        assert_eq!(client.health().status, HealthStatus::Degraded);

        // no further attempts while exhausted
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_count(), 4);

        client.shutdown().await;
        assert_eq!(client.state().status, SubscriptionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_resets_attempts() {
        let transport = ChannelTransport::new();
        transport.fail_next(2);
        let client = client(&transport, Arc::new(InMemoryInvalidationBus::default()));

        client.start();
        let state = wait_until(&client, |s| s.status == SubscriptionStatus::Connected).await;
        assert_eq!(state.attempt, 0);
        assert_eq!(transport.connect_count(), 3);

        transport.drop_connection();
        let state = wait_until(&client, |s| s.status == SubscriptionStatus::Backoff).await;
        assert_eq!(state.attempt, 1);
        assert!(state.next_retry_at.is_some());

        wait_until(&client, |s| s.status == SubscriptionStatus::Connected).await;
        assert_eq!(transport.connect_count(), 4);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let transport = ChannelTransport::new();
        transport.hang_connects(true);
        let client = client(&transport, Arc::new(InMemoryInvalidationBus::default()));

        client.start();
        let state = wait_until(&client, |s| s.status == SubscriptionStatus::Backoff).await;
        assert_eq!(state.attempt, 1);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_backoff_wait() {
        let transport = ChannelTransport::new();
        transport.fail_next(1);
        let client = ChangeFeedClient::new(
            Arc::new(transport.clone()),
            Arc::new(InMemoryInvalidationBus::default()),
            Arc::new(SystemClock),
            ChangeFeedConfig {
                reconnect_delay: Duration::from_secs(3600),
                ..config()
            },
        )
        .unwrap();

        client.start();
        wait_until(&client, |s| s.status == SubscriptionStatus::Backoff).await;

        let before = tokio::time::Instant::now();
        client.shutdown().await;

        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(client.state().status, SubscriptionStatus::Closed);
        assert_eq!(transport.connect_count(), 1);

        // second shutdown is a no-op
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let transport = ChannelTransport::new();
        let client = client(&transport, Arc::new(InMemoryInvalidationBus::default()));

        client.shutdown().await;

        assert_eq!(client.state().status, SubscriptionStatus::Closed);
        assert_eq!(transport.connect_count(), 0);
    }
}
