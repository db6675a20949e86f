use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the change-feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Connecting,
    Connected,
    Backoff,
    Closed,
}

/// Snapshot of the change-feed client's connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub status: SubscriptionStatus,
    /// Consecutive failed connection attempts since the last success.
    pub attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Retries are used up; the client idles in `Backoff` until shutdown.
    pub exhausted: bool,
}

impl SubscriptionState {
    pub fn connecting(attempt: u32) -> Self {
        Self {
            status: SubscriptionStatus::Connecting,
            attempt,
            next_retry_at: None,
            exhausted: false,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == SubscriptionStatus::Connected
    }
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self::connecting(0)
    }
}
