//! Read-side cache with read-through loading and ordered invalidation.

mod memory;
mod single_flight;

use std::time::Duration;

use tollgate_core::TollgateError;

use crate::config::{env_millis, env_parse, env_secs, require_bounded, require_nonzero};

pub use memory::InMemoryCacheStore;

/// Cache store configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a write does not carry its own.
    pub default_ttl: Duration,
    /// Capacity before least-used entries are evicted.
    pub max_entries: usize,
    /// Bound on a single read-through loader call.
    pub load_timeout: Duration,
    /// How often expired entries are swept.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_entries: 10_000,
            load_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, TollgateError> {
        let defaults = Self::default();
        let config = Self {
            default_ttl: env_secs("CACHE_DEFAULT_TTL_SECS", defaults.default_ttl)?,
            max_entries: env_parse("CACHE_MAX_ENTRIES", defaults.max_entries)?,
            load_timeout: env_millis("CACHE_LOAD_TIMEOUT_MS", defaults.load_timeout)?,
            sweep_interval: env_secs("CACHE_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TollgateError> {
        require_nonzero("defaultTtl", self.default_ttl)?;
        require_nonzero("loadTimeout", self.load_timeout)?;
        require_nonzero("sweepInterval", self.sweep_interval)?;
        require_bounded("defaultTtl", self.default_ttl)?;
        require_bounded("loadTimeout", self.load_timeout)?;
        require_bounded("sweepInterval", self.sweep_interval)?;
        if self.max_entries == 0 {
            return Err(TollgateError::config("maxEntries must be at least 1"));
        }
        Ok(())
    }
}
