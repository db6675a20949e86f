use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChangeOperation, KeyPattern};

/// Where an invalidation originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Translated from a change-feed notification.
    ChangeFeed {
        entity: String,
        operation: ChangeOperation,
    },
    /// A write-path collaborator mutated the backing store.
    WritePath,
    /// Operator or API request.
    Manual,
}

/// Request to evict every cache key matching `pattern`.
///
/// Delivered at-least-once. Applying the same event twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Key or substring pattern. `None` clears everything.
    pub pattern: Option<String>,
    pub reason: InvalidationReason,
    pub emitted_at: DateTime<Utc>,
}

impl InvalidationEvent {
    pub fn new(
        pattern: Option<String>,
        reason: InvalidationReason,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pattern,
            reason,
            emitted_at,
        }
    }

    pub fn key_pattern(&self) -> KeyPattern {
        KeyPattern::parse(self.pattern.as_deref())
    }
}

/// Coalesced notice sent to external listeners once a burst of
/// invalidations for overlapping patterns has settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshNotification {
    pub pattern: Option<String>,
    /// Number of invalidation events folded into this notice.
    pub coalesced: usize,
    pub reasons: Vec<InvalidationReason>,
    pub emitted_at: DateTime<Utc>,
}
