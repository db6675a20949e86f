//! Redis pub/sub change-feed transport.
//!
//! Notifications arrive as JSON [`ChangeNotification`] payloads on a single
//! channel. Each connect opens a dedicated pub/sub connection.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::Client;

use tollgate_core::domain::ChangeNotification;
use tollgate_core::ports::{ChangeFeedError, ChangeFeedTransport, ChangeStream};

use crate::pubsub::RedisConfig;

type NotificationStream =
    Pin<Box<dyn Stream<Item = Result<ChangeNotification, ChangeFeedError>> + Send>>;

/// Change feed read from a Redis channel.
pub struct RedisChangeFeedTransport {
    client: Client,
    url: String,
    channel: String,
}

impl RedisChangeFeedTransport {
    pub fn new(config: &RedisConfig) -> Result<Self, ChangeFeedError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| ChangeFeedError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            channel: config.change_feed_channel.clone(),
        })
    }
}

#[async_trait]
impl ChangeFeedTransport for RedisChangeFeedTransport {
    async fn connect(&self) -> Result<Box<dyn ChangeStream>, ChangeFeedError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| ChangeFeedError::Connection(e.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| ChangeFeedError::Connection(e.to_string()))?;

        let stream = pubsub.into_on_message().map(|msg| {
            let payload: String = msg
                .get_payload()
                .map_err(|e| ChangeFeedError::Decode(e.to_string()))?;
            serde_json::from_str(&payload).map_err(|e| ChangeFeedError::Decode(e.to_string()))
        });

        Ok(Box::new(RedisChangeStream {
            inner: Box::pin(stream),
        }))
    }

    fn describe(&self) -> String {
        format!("redis {} channel {}", self.url, self.channel)
    }
}

struct RedisChangeStream {
    inner: NotificationStream,
}

#[async_trait]
impl ChangeStream for RedisChangeStream {
    async fn next(&mut self) -> Option<Result<ChangeNotification, ChangeFeedError>> {
        self.inner.next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use redis::AsyncCommands;
    use std::time::Duration;
    use tollgate_core::domain::ChangeOperation;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6389".to_string()),
            connect_timeout: Duration::from_secs(1),
            change_feed_channel: "tollgate:test:changes".to_string(),
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn test_redis_change_feed_decodes_json() {
        let config = test_config();
        let transport = RedisChangeFeedTransport::new(&config).unwrap();

        let mut stream =
            match tokio::time::timeout(config.connect_timeout, transport.connect()).await {
                Ok(Ok(s)) => s,
                _ => return,
            };

        let client = redis::Client::open(config.url.as_str()).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();

        let notice = ChangeNotification {
            entity: "orders".to_string(),
            operation: ChangeOperation::Delete,
            keys: vec!["7".to_string()],
            occurred_at: Utc::now(),
        };
        conn.publish::<_, _, ()>(&config.change_feed_channel, "not json")
            .await
            .unwrap();
        conn.publish::<_, _, ()>(
            &config.change_feed_channel,
            serde_json::to_string(&notice).unwrap(),
        )
        .await
        .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), ChangeStream::next(&mut *stream))
            .await
            .unwrap();
        assert!(matches!(first, Some(Err(ChangeFeedError::Decode(_)))));

        let second = tokio::time::timeout(Duration::from_secs(2), ChangeStream::next(&mut *stream))
            .await
            .unwrap();
        assert_eq!(second.unwrap().unwrap(), notice);
    }
}
