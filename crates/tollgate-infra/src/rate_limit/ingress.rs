//! Per-client HTTP ingress limiter using the governor crate.
//!
//! This is a coarse flood guard in front of the routes. It is independent of
//! the progressive limiter and never touches the attempt log.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};

use tollgate_core::TollgateError;

use crate::config::{env_parse, env_secs, require_nonzero};

/// Ingress limiter configuration.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Maximum requests per window, per client key.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window: Duration::from_secs(60),
        }
    }
}

impl IngressConfig {
    pub fn from_env() -> Result<Self, TollgateError> {
        let defaults = Self::default();
        Ok(Self {
            max_requests: env_parse("INGRESS_MAX_REQUESTS", defaults.max_requests)?,
            window: env_secs("INGRESS_WINDOW_SECS", defaults.window)?,
        })
    }
}

/// Keyed GCRA limiter. Limits are per-process.
pub struct IngressLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl IngressLimiter {
    pub fn new(config: &IngressConfig) -> Result<Self, TollgateError> {
        require_nonzero("ingressWindow", config.window)?;
        let burst = NonZeroU32::new(config.max_requests)
            .ok_or_else(|| TollgateError::config("ingressMaxRequests must be at least 1"))?;
        let quota = Quota::with_period(config.window / config.max_requests)
            .ok_or_else(|| TollgateError::config("ingress window too short"))?
            .allow_burst(burst);

        Ok(Self {
            limiter: DefaultKeyedRateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        })
    }

    /// `Err` carries how long the client should wait.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.limiter
            .check_key(&key.to_string())
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Forget keys whose state is back to full burst capacity.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}
