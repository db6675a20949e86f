use std::time::Duration;

use tollgate_core::TollgateError;

use crate::cache::CacheConfig;
use crate::change_feed::ChangeFeedConfig;
use crate::config::{env_millis, require_bounded};
use crate::rate_limit::RateLimitConfig;

/// Aggregated configuration for a [`Coordinator`](super::Coordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub change_feed: ChangeFeedConfig,
    /// Quiet period after the last bus event for a pattern before its
    /// eviction pass runs.
    pub invalidation_coalesce_window: Duration,
    /// Buffer of the refresh notification broadcast.
    pub refresh_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            change_feed: ChangeFeedConfig::default(),
            invalidation_coalesce_window: Duration::from_millis(250),
            refresh_buffer: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, TollgateError> {
        let defaults = Self::default();
        let config = Self {
            rate_limit: RateLimitConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            change_feed: ChangeFeedConfig::from_env()?,
            invalidation_coalesce_window: env_millis(
                "INVALIDATION_COALESCE_MS",
                defaults.invalidation_coalesce_window,
            )?,
            refresh_buffer: defaults.refresh_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TollgateError> {
        self.rate_limit.validate()?;
        self.cache.validate()?;
        self.change_feed.validate()?;
        require_bounded("invalidationCoalesceWindow", self.invalidation_coalesce_window)?;
        if self.refresh_buffer == 0 {
            return Err(TollgateError::config("refreshBuffer must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_config_errors_surface() {
        let config = CoordinatorConfig {
            invalidation_coalesce_window: Duration::from_secs(u64::MAX),
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CoordinatorConfig {
            rate_limit: RateLimitConfig {
                lockout_duration: Duration::from_secs(u64::MAX),
                ..RateLimitConfig::default()
            },
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(CoordinatorConfig::default().validate().is_ok());
    }
}
