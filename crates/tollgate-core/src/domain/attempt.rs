use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Identifier;

/// Free-form key/value context attached to an attempt (route, status code...).
pub type AttemptMetadata = BTreeMap<String, String>;

/// Outcome of one guarded action. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub identifier: Identifier,
    pub action_type: String,
    pub success: bool,
    pub occurred_at: DateTime<Utc>,
    pub metadata: AttemptMetadata,
}

impl AttemptRecord {
    /// Create a new record with a generated ID.
    pub fn new(
        identifier: Identifier,
        action_type: impl Into<String>,
        success: bool,
        occurred_at: DateTime<Utc>,
        metadata: AttemptMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            action_type: action_type.into(),
            success,
            occurred_at,
            metadata,
        }
    }

    pub fn failed(&self) -> bool {
        !self.success
    }
}
