use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a guard call was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyReason {
    /// Fixed quota for the sliding window is used up.
    Quota,
    /// Progressive delay after recent failures has not elapsed.
    Delay,
    /// Temporary hard deny after dense failures.
    Lockout,
    /// The attempt log could not be read; the limiter failed closed.
    Unavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Quota => "quota",
            DenyReason::Delay => "delay",
            DenyReason::Lockout => "lockout",
            DenyReason::Unavailable => "unavailable",
        }
    }
}

fn offset(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Result of a guard check. Computed fresh on every call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub remaining_attempts: u32,
    /// When the oldest attempt in the quota window rolls out.
    pub reset_at: DateTime<Utc>,
    pub locked: bool,
    pub lockout_remaining: Option<Duration>,
    pub required_delay: Option<Duration>,
    pub reason: Option<DenyReason>,
    /// Instant the decision was computed for.
    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    /// An allowing decision.
    pub fn allow(remaining_attempts: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining_attempts,
            reset_at,
            locked: false,
            lockout_remaining: None,
            required_delay: None,
            reason: None,
            evaluated_at: now,
        }
    }

    /// Fail-closed decision used when the attempt log cannot be consulted.
    pub fn unavailable(now: DateTime<Utc>, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
            reset_at: offset(now, retry_after),
            locked: false,
            lockout_remaining: None,
            required_delay: Some(retry_after),
            reason: Some(DenyReason::Unavailable),
            evaluated_at: now,
        }
    }

    /// Instant at which a retry can be expected to pass, if denied.
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        if self.allowed {
            return None;
        }

        let wait = self.retry_after().unwrap_or_default();
        Some(offset(self.evaluated_at, wait))
    }

    /// Wait until a retry can be expected to pass, if denied.
    pub fn retry_after(&self) -> Option<Duration> {
        if self.allowed {
            return None;
        }

        match self.reason {
            Some(DenyReason::Lockout) => self.lockout_remaining,
            Some(DenyReason::Delay) | Some(DenyReason::Unavailable) => self.required_delay,
            Some(DenyReason::Quota) | None => {
                Some((self.reset_at - self.evaluated_at).to_std().unwrap_or_default())
            }
        }
    }
}
