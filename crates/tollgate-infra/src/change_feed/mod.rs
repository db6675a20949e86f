//! Change-feed subscription: reconnecting client plus transports.

mod client;
mod memory;
mod queue;

#[cfg(feature = "redis")]
mod redis;

use std::time::Duration;

use tollgate_core::TollgateError;

use crate::config::{env_millis, env_parse, require_bounded, require_nonzero};

pub use client::ChangeFeedClient;
pub use memory::ChannelTransport;

#[cfg(feature = "redis")]
pub use self::redis::RedisChangeFeedTransport;

/// Change-feed client configuration.
#[derive(Debug, Clone)]
pub struct ChangeFeedConfig {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed wait between attempts.
    pub reconnect_delay: Duration,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Invalidations buffered between receipt and publishing.
    pub queue_capacity: usize,
}

impl Default for ChangeFeedConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 1024,
        }
    }
}

impl ChangeFeedConfig {
    pub fn from_env() -> Result<Self, TollgateError> {
        let defaults = Self::default();
        let config = Self {
            max_reconnect_attempts: env_parse(
                "CHANGE_FEED_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            reconnect_delay: env_millis(
                "CHANGE_FEED_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            )?,
            connect_timeout: env_millis(
                "CHANGE_FEED_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            )?,
            queue_capacity: env_parse("CHANGE_FEED_QUEUE_CAPACITY", defaults.queue_capacity)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TollgateError> {
        require_nonzero("changeFeedConnectTimeout", self.connect_timeout)?;
        require_bounded("changeFeedConnectTimeout", self.connect_timeout)?;
        require_bounded("changeFeedReconnectDelay", self.reconnect_delay)?;
        if self.queue_capacity == 0 {
            return Err(TollgateError::config(
                "changeFeedQueueCapacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_reconnect_delay_rejected() {
        let config = ChangeFeedConfig {
            reconnect_delay: Duration::from_secs(u64::MAX),
            ..ChangeFeedConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TollgateError::Configuration(_))
        ));
        assert!(ChangeFeedConfig::default().validate().is_ok());
    }
}
