use std::sync::atomic::AtomicUsize;

use tollgate_core::domain::{ChangeNotification, ChangeOperation, DenyReason, SubscriptionStatus};
use tollgate_core::ports::{BusError, InvalidationHandler};

use super::*;
use crate::change_feed::{ChangeFeedConfig, ChannelTransport};
use crate::clock::ManualClock;
use crate::rate_limit::RateLimitConfig;

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        rate_limit: RateLimitConfig {
            max_attempts_per_window: 20,
            lockout_threshold: 5,
            lockout_window_duration: Duration::from_secs(5 * 60),
            lockout_duration: Duration::from_secs(15 * 60),
            ..RateLimitConfig::default()
        },
        change_feed: ChangeFeedConfig {
            max_reconnect_attempts: 2,
            reconnect_delay: Duration::from_secs(1),
            ..ChangeFeedConfig::default()
        },
        invalidation_coalesce_window: Duration::from_millis(100),
        ..CoordinatorConfig::default()
    }
}

fn collaborators(clock: &ManualClock, transport: Option<&ChannelTransport>) -> Collaborators {
    Collaborators {
        clock: Arc::new(clock.clone()),
        change_feed: transport
            .map(|t| Arc::new(t.clone()) as Arc<dyn ChangeFeedTransport>),
        ..Collaborators::in_memory()
    }
}

async fn start(
    clock: &ManualClock,
    transport: Option<&ChannelTransport>,
) -> Coordinator<String> {
    Coordinator::start(config(), collaborators(clock, transport))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_five_failures_lock_the_caller_out() {
    let clock = ManualClock::default();
    let coordinator = start(&clock, None).await;
    let id = Identifier::derive("203.0.113.9", "login");

    for _ in 0..5 {
        coordinator
            .record_outcome(&id, "login", false, AttemptMetadata::new())
            .await;
        clock.advance(Duration::from_secs(30));
    }

    let decision = coordinator.guard(&id, "login", None).await;
    assert!(decision.locked);
    assert_eq!(decision.reason, Some(DenyReason::Lockout));
    let remaining = decision.lockout_remaining.unwrap();
    assert!(remaining > Duration::from_secs(14 * 60));
    assert!(remaining <= Duration::from_secs(15 * 60));

    // other actions are unaffected
    assert!(coordinator.guard(&id, "search", None).await.allowed);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_three_concurrent_reads_share_one_load() {
    let clock = ManualClock::default();
    let coordinator = Arc::new(start(&clock, None).await);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let coordinator = coordinator.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .cached("B", None, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok("record-b".to_string())
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "record-b");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_set_then_expire() {
    let clock = ManualClock::default();
    let coordinator = start(&clock, None).await;

    coordinator
        .cache()
        .set("A", "1".to_string(), Some(Duration::from_secs(10)))
        .await;
    clock.advance(Duration::from_secs(11));

    assert!(coordinator.cache().get("A").await.is_none());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_loader_error_reaches_caller() {
    let clock = ManualClock::default();
    let coordinator = start(&clock, None).await;

    let result = coordinator
        .cached("order:404", None, || async {
            Err(anyhow::anyhow!("order 404 not found"))
        })
        .await;

    match result {
        Err(TollgateError::Loader(e)) => assert_eq!(e.inner().to_string(), "order 404 not found"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(coordinator.stats().size, 0);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_direct_invalidation_evicts_and_notifies() {
    let clock = ManualClock::default();
    let coordinator = start(&clock, None).await;
    let mut refresh = coordinator.subscribe_refresh();

    for i in 0..50 {
        let key = if i < 5 {
            format!("orders:{i}")
        } else {
            format!("customers:{i}")
        };
        coordinator.cache().set(&key, "v".to_string(), None).await;
    }

    assert_eq!(coordinator.invalidate(Some("orders")).await, 5);
    assert_eq!(coordinator.stats().size, 45);

    let notice = refresh.recv().await.unwrap();
    assert_eq!(notice.pattern.as_deref(), Some("orders"));
    assert_eq!(notice.reasons, vec![InvalidationReason::Manual]);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_change_feed_invalidates_cache() {
    let clock = ManualClock::default();
    let transport = ChannelTransport::new();
    let coordinator = start(&clock, Some(&transport)).await;
    let mut refresh = coordinator.subscribe_refresh();

    coordinator
        .cache()
        .set("orders:42", "stale".to_string(), None)
        .await;
    coordinator
        .cache()
        .set("orders:43", "fine".to_string(), None)
        .await;

    while !transport.is_connected() {
        tokio::task::yield_now().await;
    }
    transport.send(ChangeNotification {
        entity: "orders".to_string(),
        operation: ChangeOperation::Update,
        keys: vec!["42".to_string()],
        occurred_at: clock.now(),
    });

    let notice = refresh.recv().await.unwrap();
    assert_eq!(notice.pattern.as_deref(), Some("orders:42"));
    assert!(coordinator.cache().get("orders:42").await.is_none());
    assert!(coordinator.cache().get("orders:43").await.is_some());

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_feed_degrades_health_but_caching_continues() {
    let clock = ManualClock::default();
    let transport = ChannelTransport::new();
    transport.fail_next(u32::MAX);
    let coordinator = start(&clock, Some(&transport)).await;

    while !coordinator
        .subscription_state()
        .is_some_and(|s| s.exhausted)
    {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let report = coordinator.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.subscription.unwrap().exhausted);

    let value = coordinator
        .cached("orders:1", None, || async { Ok("loaded".to_string()) })
        .await
        .unwrap();
    assert_eq!(value, "loaded");

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent_and_closes_feed() {
    let clock = ManualClock::default();
    let transport = ChannelTransport::new();
    let coordinator = start(&clock, Some(&transport)).await;

    coordinator.shutdown().await;
    coordinator.shutdown().await;

    assert_eq!(
        coordinator.subscription_state().map(|s| s.status),
        Some(SubscriptionStatus::Closed)
    );
}

#[tokio::test]
async fn test_health_without_feed_is_healthy() {
    let coordinator: Coordinator<String> =
        Coordinator::start(config(), Collaborators::in_memory())
            .await
            .unwrap();

    let report = coordinator.health().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.subscription.is_none());
    assert_eq!(report.checks.len(), 4);

    coordinator.shutdown().await;
}

/// Bus whose delivery task ends right after subscribing.
struct EndedBus;

#[async_trait::async_trait]
impl InvalidationBus for EndedBus {
    async fn publish(&self, _event: InvalidationEvent) -> Result<(), BusError> {
        Ok(())
    }

    async fn subscribe(
        &self,
        _handler: InvalidationHandler,
    ) -> Result<SubscriptionHandle, BusError> {
        Ok(SubscriptionHandle::new(tokio::spawn(async {})))
    }
}

#[tokio::test]
async fn test_ended_bus_subscription_degrades_health() {
    let coordinator: Coordinator<String> = Coordinator::start(
        config(),
        Collaborators {
            bus: Arc::new(EndedBus),
            ..Collaborators::in_memory()
        },
    )
    .await
    .unwrap();

    while !lock(&coordinator.bus_subscription)
        .as_ref()
        .is_some_and(|sub| sub.is_finished())
    {
        tokio::task::yield_now().await;
    }

    let report = coordinator.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    let bus = report
        .checks
        .iter()
        .find(|c| c.component == "invalidation_bus")
        .unwrap();
    assert_eq!(bus.status, HealthStatus::Degraded);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected_at_start() {
    let mut bad = config();
    bad.cache.max_entries = 0;

    let result = Coordinator::<String>::start(bad, Collaborators::in_memory()).await;
    assert!(matches!(result, Err(TollgateError::Configuration(_))));
}
