//! Progressive, behavior-aware rate limiter backed by the attempt log.
//!
//! Three layered controls are evaluated over a snapshot of the attempt log:
//!
//! 1. a fixed quota over a sliding window, outcome-agnostic;
//! 2. an exponential delay between consecutive failures;
//! 3. a lockout once failures get dense, optionally escalated by an
//!    anomalous [`BehaviorSignal`].
//!
//! A success resets the failure streak but never the quota. A lockout, once
//! triggered, stands until it expires.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tollgate_core::TollgateError;
use tollgate_core::domain::{
    AnomalyPolicy, AttemptMetadata, AttemptRecord, BehaviorSignal, Decision, DenyReason,
    Identifier,
};
use tollgate_core::ports::{AttemptLog, Clock, RateLimitError, RateLimiter};

use crate::clock::{saturating_add, saturating_sub};
use crate::config::{env_millis, env_parse, env_secs, require_bounded, require_nonzero};

/// Progressive rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Attempts allowed per sliding window, regardless of outcome.
    pub max_attempts_per_window: u32,
    /// Sliding quota window.
    pub window_duration: Duration,
    /// Failures inside `lockout_window_duration` that trigger a lockout.
    pub lockout_threshold: u32,
    /// Detection window for lockout escalation.
    pub lockout_window_duration: Duration,
    /// How long a lockout lasts once triggered.
    pub lockout_duration: Duration,
    /// Delay after the first failure; doubles with each further failure.
    pub progressive_delay_base: Duration,
    /// Upper bound for the progressive delay.
    pub progressive_delay_cap: Duration,
    /// Bound on every attempt log read or write.
    pub io_timeout: Duration,
    /// Retry hint handed out when the limiter fails closed.
    pub fail_closed_retry_after: Duration,
    /// Heuristics used to score behavior signals.
    pub anomaly: AnomalyPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_window: 30,
            window_duration: Duration::from_secs(60 * 60),
            lockout_threshold: 5,
            lockout_window_duration: Duration::from_secs(5 * 60),
            lockout_duration: Duration::from_secs(24 * 60 * 60),
            progressive_delay_base: Duration::from_secs(1),
            progressive_delay_cap: Duration::from_secs(5 * 60),
            io_timeout: Duration::from_millis(500),
            fail_closed_retry_after: Duration::from_secs(5),
            anomaly: AnomalyPolicy::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self, TollgateError> {
        let defaults = Self::default();
        let config = Self {
            max_attempts_per_window: env_parse(
                "RATE_LIMIT_MAX_ATTEMPTS",
                defaults.max_attempts_per_window,
            )?,
            window_duration: env_secs("RATE_LIMIT_WINDOW_SECS", defaults.window_duration)?,
            lockout_threshold: env_parse("LOCKOUT_THRESHOLD", defaults.lockout_threshold)?,
            lockout_window_duration: env_secs(
                "LOCKOUT_WINDOW_SECS",
                defaults.lockout_window_duration,
            )?,
            lockout_duration: env_secs("LOCKOUT_DURATION_SECS", defaults.lockout_duration)?,
            progressive_delay_base: env_millis(
                "PROGRESSIVE_DELAY_BASE_MS",
                defaults.progressive_delay_base,
            )?,
            progressive_delay_cap: env_secs(
                "PROGRESSIVE_DELAY_CAP_SECS",
                defaults.progressive_delay_cap,
            )?,
            io_timeout: env_millis("ATTEMPT_LOG_TIMEOUT_MS", defaults.io_timeout)?,
            fail_closed_retry_after: env_secs(
                "FAIL_CLOSED_RETRY_SECS",
                defaults.fail_closed_retry_after,
            )?,
            anomaly: AnomalyPolicy {
                min_session_duration: env_millis(
                    "ANOMALY_MIN_SESSION_MS",
                    defaults.anomaly.min_session_duration,
                )?,
                max_input_rate_per_sec: env_parse(
                    "ANOMALY_MAX_INPUT_RATE",
                    defaults.anomaly.max_input_rate_per_sec,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TollgateError> {
        if self.max_attempts_per_window == 0 {
            return Err(TollgateError::config("maxAttemptsPerWindow must be at least 1"));
        }
        if self.lockout_threshold == 0 {
            return Err(TollgateError::config("lockoutThreshold must be at least 1"));
        }
        require_nonzero("windowDuration", self.window_duration)?;
        require_nonzero("lockoutWindowDuration", self.lockout_window_duration)?;
        require_nonzero("lockoutDuration", self.lockout_duration)?;
        require_nonzero("attemptLogTimeout", self.io_timeout)?;
        for (name, value) in [
            ("windowDuration", self.window_duration),
            ("lockoutWindowDuration", self.lockout_window_duration),
            ("lockoutDuration", self.lockout_duration),
            ("progressiveDelayBase", self.progressive_delay_base),
            ("progressiveDelayCap", self.progressive_delay_cap),
            ("attemptLogTimeout", self.io_timeout),
            ("failClosedRetryAfter", self.fail_closed_retry_after),
            ("anomalyMinSession", self.anomaly.min_session_duration),
        ] {
            require_bounded(name, value)?;
        }
        let rate = self.anomaly.max_input_rate_per_sec;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(TollgateError::config(
                "anomalyMaxInputRate must be a positive number",
            ));
        }
        if self.progressive_delay_base > self.progressive_delay_cap {
            return Err(TollgateError::config(
                "progressiveDelayBase must not exceed progressiveDelayCap",
            ));
        }
        Ok(())
    }

    /// How far back a decision needs to look into the attempt log.
    pub fn horizon(&self) -> Duration {
        self.window_duration
            .max(self.lockout_window_duration.saturating_add(self.lockout_duration))
    }

    /// Progressive delay after `failures` consecutive failures.
    pub fn delay_for(&self, failures: usize) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = u32::try_from(failures - 1).unwrap_or(u32::MAX).min(31);
        self.progressive_delay_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.progressive_delay_cap)
            .min(self.progressive_delay_cap)
    }
}

fn until(later: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (later - now).to_std().unwrap_or_default()
}

/// Compute a decision from an attempt log snapshot.
///
/// `records` must hold every attempt for one `(identifier, action_type)`
/// since `now - config.horizon()`, oldest first. Pure: the same inputs
/// always produce the same decision.
pub fn evaluate(
    config: &RateLimitConfig,
    records: &[AttemptRecord],
    now: DateTime<Utc>,
    signal: Option<&BehaviorSignal>,
) -> Decision {
    let window = config.window_duration;
    let lockout_window = config.lockout_window_duration;
    let lockout_duration = config.lockout_duration;

    // 1. fixed quota
    let window_start = saturating_sub(now, window);
    let in_window: Vec<&AttemptRecord> = records
        .iter()
        .filter(|r| r.occurred_at > window_start && r.occurred_at <= now)
        .collect();
    let count = u32::try_from(in_window.len()).unwrap_or(u32::MAX);
    let remaining = config.max_attempts_per_window.saturating_sub(count);
    let reset_at = in_window
        .first()
        .map(|r| saturating_add(r.occurred_at, window))
        .unwrap_or_else(|| saturating_add(now, window));
    let quota_denied = count >= config.max_attempts_per_window;

    // 2. progressive delay over the current failure streak
    let streak_start = records
        .iter()
        .rposition(|r| r.success)
        .map(|i| i + 1)
        .unwrap_or(0);
    let streak = &records[streak_start..];
    let required_delay = streak.last().and_then(|last| {
        let delay = config.delay_for(streak.len());
        let elapsed = until(now, last.occurred_at);
        (elapsed < delay).then(|| delay - elapsed)
    });

    // 3. lockout: dense failures inside one success-free segment
    let mut locked_until: Option<DateTime<Utc>> = None;
    for segment in records.split(|r| r.success) {
        let mut lo = 0;
        for hi in 0..segment.len() {
            let t = segment[hi].occurred_at;
            while segment[lo].occurred_at <= saturating_sub(t, lockout_window) {
                lo += 1;
            }
            if hi - lo + 1 >= config.lockout_threshold as usize {
                let candidate = saturating_add(t, lockout_duration);
                locked_until = Some(locked_until.map_or(candidate, |cur| cur.max(candidate)));
            }
        }
    }

    // anomaly escalation needs at least one recent failure on record
    if let Some(signal) = signal {
        let recent_failure = streak
            .last()
            .filter(|r| r.occurred_at > saturating_sub(now, lockout_window));
        if let Some(failure) = recent_failure {
            if signal.is_anomalous(&config.anomaly) {
                let candidate = saturating_add(failure.occurred_at, lockout_duration);
                locked_until = Some(locked_until.map_or(candidate, |cur| cur.max(candidate)));
            }
        }
    }

    let mut decision = Decision::allow(remaining, reset_at, now);
    decision.required_delay = required_delay;

    if let Some(until_at) = locked_until.filter(|t| *t > now) {
        decision.allowed = false;
        decision.locked = true;
        decision.lockout_remaining = Some(until(until_at, now));
        decision.reason = Some(DenyReason::Lockout);
        return decision;
    }

    let quota_wait = quota_denied.then(|| until(reset_at, now));
    decision.reason = match (quota_wait, required_delay) {
        (Some(q), Some(d)) if d > q => Some(DenyReason::Delay),
        (Some(_), _) => Some(DenyReason::Quota),
        (None, Some(_)) => Some(DenyReason::Delay),
        (None, None) => None,
    };
    decision.allowed = decision.reason.is_none();

    decision
}

/// Rate limiter over an [`AttemptLog`].
///
/// Fails closed: if the log cannot be read within `io_timeout` the caller is
/// denied with [`DenyReason::Unavailable`].
pub struct ProgressiveRateLimiter {
    log: Arc<dyn AttemptLog>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    fail_closed: AtomicU64,
}

impl ProgressiveRateLimiter {
    pub fn new(
        log: Arc<dyn AttemptLog>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
    ) -> Result<Self, TollgateError> {
        config.validate()?;
        Ok(Self {
            log,
            clock,
            config,
            fail_closed: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of checks denied because the attempt log was unreadable.
    pub fn fail_closed_count(&self) -> u64 {
        self.fail_closed.load(Ordering::Relaxed)
    }

    /// Drop attempt records older than the decision horizon.
    pub async fn prune(&self) -> Result<u64, RateLimitError> {
        let cutoff = saturating_sub(self.clock.now(), self.config.horizon());
        self.log
            .prune(cutoff)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))
    }

    /// Check the attempt log answers within `io_timeout`.
    pub async fn ping(&self) -> Result<(), RateLimitError> {
        let health_id = Identifier::new("__health");
        tokio::time::timeout(
            self.config.io_timeout,
            self.log.since(&health_id, "health", self.clock.now()),
        )
        .await
        .map_err(|_| RateLimitError::Timeout(self.config.io_timeout))?
        .map(|_| ())
        .map_err(|e| RateLimitError::Backend(e.to_string()))
    }

    fn fail_closed(&self, identifier: &Identifier, action_type: &str, error: &str) -> Decision {
        self.fail_closed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            identifier = %identifier,
            action_type = %action_type,
            error = %error,
            "Attempt log unreadable, failing closed"
        );
        Decision::unavailable(self.clock.now(), self.config.fail_closed_retry_after)
    }
}

#[async_trait]
impl RateLimiter for ProgressiveRateLimiter {
    async fn check_and_consume(
        &self,
        identifier: &Identifier,
        action_type: &str,
        signal: Option<&BehaviorSignal>,
    ) -> Decision {
        let now = self.clock.now();
        let since = saturating_sub(now, self.config.horizon());

        let read = tokio::time::timeout(
            self.config.io_timeout,
            self.log.since(identifier, action_type, since),
        )
        .await;

        let records = match read {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return self.fail_closed(identifier, action_type, &e.to_string()),
            Err(_) => return self.fail_closed(identifier, action_type, "read timed out"),
        };

        let decision = evaluate(&self.config, &records, now, signal);

        if let Some(reason) = decision.reason {
            tracing::debug!(
                identifier = %identifier,
                action_type = %action_type,
                reason = reason.as_str(),
                retry_after = ?decision.retry_after(),
                "Guard denied"
            );
        }

        decision
    }

    async fn record_outcome(
        &self,
        identifier: &Identifier,
        action_type: &str,
        success: bool,
        metadata: AttemptMetadata,
    ) -> Result<(), RateLimitError> {
        let record = AttemptRecord::new(
            identifier.clone(),
            action_type,
            success,
            self.clock.now(),
            metadata,
        );

        tokio::time::timeout(self.config.io_timeout, self.log.append(record))
            .await
            .map_err(|_| RateLimitError::Timeout(self.config.io_timeout))?
            .map_err(|e| RateLimitError::Backend(e.to_string()))
    }
}
