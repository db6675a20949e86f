//! Attempt log port - durable, append-only attempt history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AttemptRecord, Identifier};
use crate::error::TollgateError;

/// Append-only log of guarded attempts, queried by time window.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    /// Append a record. Must be durable once this returns `Ok`.
    async fn append(&self, record: AttemptRecord) -> Result<(), AttemptLogError>;

    /// All records for `(identifier, action_type)` that occurred at or after
    /// `since`, ordered oldest first.
    async fn since(
        &self,
        identifier: &Identifier,
        action_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttemptRecord>, AttemptLogError>;

    /// Delete records older than `cutoff`. Retention only, never the hot path.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64, AttemptLogError>;
}

/// Attempt log errors.
#[derive(Debug, thiserror::Error)]
pub enum AttemptLogError {
    #[error("Attempt log unavailable: {0}")]
    Unavailable(String),

    #[error("Attempt log query failed: {0}")]
    Query(String),
}

impl From<AttemptLogError> for TollgateError {
    fn from(err: AttemptLogError) -> Self {
        TollgateError::TransientBackingStore(err.to_string())
    }
}
