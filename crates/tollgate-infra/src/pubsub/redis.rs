//! Redis invalidation bus.
//!
//! Events travel as JSON on a single channel, so every process subscribed to
//! the same Redis sees every invalidation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};

use tollgate_core::TollgateError;
use tollgate_core::domain::InvalidationEvent;
use tollgate_core::ports::{BusError, InvalidationBus, InvalidationHandler, SubscriptionHandle};

use crate::config::{env_secs, require_bounded, require_nonzero};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Channel carrying invalidation events
    pub invalidation_channel: String,
    /// Channel carrying change-feed notifications
    pub change_feed_channel: String,
    /// Wait before resubscribing after the subscriber connection drops
    pub resubscribe_delay: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            invalidation_channel: "tollgate:invalidations".to_string(),
            change_feed_channel: "tollgate:changes".to_string(),
            resubscribe_delay: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Load from `REDIS_*` / `*_CHANNEL`. Returns `None` when no URL is set.
    pub fn from_env() -> Result<Option<Self>, TollgateError> {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return Ok(None);
        };
        let defaults = Self::default();
        let resubscribe_delay = env_secs("REDIS_RESUBSCRIBE_SECS", defaults.resubscribe_delay)?;
        require_nonzero("redisResubscribeDelay", resubscribe_delay)?;
        require_bounded("redisResubscribeDelay", resubscribe_delay)?;

        Ok(Some(Self {
            url,
            connect_timeout: env_secs("REDIS_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            invalidation_channel: std::env::var("INVALIDATION_CHANNEL")
                .unwrap_or(defaults.invalidation_channel),
            change_feed_channel: std::env::var("CHANGE_FEED_CHANNEL")
                .unwrap_or(defaults.change_feed_channel),
            resubscribe_delay,
        }))
    }
}

/// Redis-backed invalidation bus.
pub struct RedisInvalidationBus {
    conn: ConnectionManager,
    client: Client,
    channel: String,
    resubscribe_delay: Duration,
}

impl RedisInvalidationBus {
    pub async fn new(config: &RedisConfig) -> Result<Self, BusError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| BusError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BusError::Connection("Connection timed out".to_string()))?
            .map_err(|e| BusError::Connection(e.to_string()))?;

        tracing::info!(url = %config.url, channel = %config.invalidation_channel, "Connected to Redis invalidation bus");

        Ok(Self {
            conn,
            client,
            channel: config.invalidation_channel.clone(),
            resubscribe_delay: config.resubscribe_delay,
        })
    }
}

async fn open_pubsub(client: &Client, channel: &str) -> Result<PubSub, BusError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| BusError::Subscribe(e.to_string()))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| BusError::Subscribe(e.to_string()))?;
    Ok(pubsub)
}

fn payloads(pubsub: PubSub) -> impl Stream<Item = String> + Send {
    pubsub.into_on_message().filter_map(|msg| async move {
        match msg.get_payload::<String>() {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get message payload");
                None
            }
        }
    })
}

/// Deliver payloads from `stream` to `handler`, resubscribing through
/// `reconnect` every time the stream ends. Runs until aborted.
async fn relay<S, C, Fut>(
    mut stream: S,
    mut reconnect: C,
    delay: Duration,
    handler: InvalidationHandler,
    channel: String,
) where
    S: Stream<Item = String>,
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<S, BusError>>,
{
    loop {
        {
            let mut messages = std::pin::pin!(stream);
            while let Some(payload) = messages.next().await {
                match serde_json::from_str::<InvalidationEvent>(&payload) {
                    Ok(event) => handler(event).await,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Dropping malformed invalidation");
                    }
                }
            }
        }

        tracing::warn!(channel = %channel, "Invalidation subscription dropped, resubscribing");
        stream = loop {
            tokio::time::sleep(delay).await;
            match reconnect().await {
                Ok(next) => {
                    tracing::info!(channel = %channel, "Resubscribed to invalidation channel");
                    break next;
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Resubscribe failed");
                }
            }
        };
    }
}

#[async_trait]
impl InvalidationBus for RedisInvalidationBus {
    async fn publish(&self, event: InvalidationEvent) -> Result<(), BusError> {
        let payload =
            serde_json::to_string(&event).map_err(|e| BusError::Publish(e.to_string()))?;

        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.channel, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        handler: InvalidationHandler,
    ) -> Result<SubscriptionHandle, BusError> {
        let pubsub = open_pubsub(&self.client, &self.channel).await?;
        tracing::debug!(channel = %self.channel, "Subscribed to Redis channel");

        let client = self.client.clone();
        let channel = self.channel.clone();
        let reconnect = move || {
            let client = client.clone();
            let channel = channel.clone();
            async move { open_pubsub(&client, &channel).await.map(payloads) }
        };

        let task = tokio::spawn(relay(
            payloads(pubsub),
            reconnect,
            self.resubscribe_delay,
            handler,
            self.channel.clone(),
        ));

        Ok(SubscriptionHandle::new(task))
    }
}
