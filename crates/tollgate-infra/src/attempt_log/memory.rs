//! In-memory attempt log - used when no database is configured.
//!
//! Records are sharded per `(identifier, action_type)` so unrelated callers
//! never contend on the same lock.
//! Note: History is lost on process restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use tollgate_core::domain::{AttemptRecord, Identifier};
use tollgate_core::ports::{AttemptLog, AttemptLogError};

type LogKey = (Identifier, String);

/// In-memory attempt log.
#[derive(Default)]
pub struct InMemoryAttemptLog {
    records: DashMap<LogKey, Vec<AttemptRecord>>,
}

impl InMemoryAttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AttemptLog for InMemoryAttemptLog {
    async fn append(&self, record: AttemptRecord) -> Result<(), AttemptLogError> {
        let key = (record.identifier.clone(), record.action_type.clone());
        let mut shard = self.records.entry(key).or_default();

        // Concurrent writers may arrive slightly out of order.
        let at = shard.partition_point(|r| r.occurred_at <= record.occurred_at);
        shard.insert(at, record);

        Ok(())
    }

    async fn since(
        &self,
        identifier: &Identifier,
        action_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttemptRecord>, AttemptLogError> {
        let key = (identifier.clone(), action_type.to_string());
        let Some(shard) = self.records.get(&key) else {
            return Ok(Vec::new());
        };

        let start = shard.partition_point(|r| r.occurred_at < since);
        Ok(shard[start..].to_vec())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64, AttemptLogError> {
        let mut removed = 0u64;

        self.records.retain(|_, shard| {
            let before = shard.len();
            shard.retain(|r| r.occurred_at >= cutoff);
            removed += (before - shard.len()) as u64;
            !shard.is_empty()
        });

        tracing::debug!(removed, cutoff = %cutoff, "Pruned in-memory attempt log");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, action: &str, success: bool, at: DateTime<Utc>) -> AttemptRecord {
        AttemptRecord::new(Identifier::new(id), action, success, at, Default::default())
    }

    #[tokio::test]
    async fn test_since_filters_by_key_and_time() {
        let log = InMemoryAttemptLog::new();
        let t0 = Utc::now();

        log.append(record("x", "search", false, t0)).await.unwrap();
        log.append(record("x", "search", true, t0 + Duration::minutes(2)))
            .await
            .unwrap();
        log.append(record("x", "login", false, t0 + Duration::minutes(3)))
            .await
            .unwrap();
        log.append(record("y", "search", false, t0 + Duration::minutes(3)))
            .await
            .unwrap();

        let found = log
            .since(&Identifier::new("x"), "search", t0 + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert!(found[0].success);
    }

    #[tokio::test]
    async fn test_out_of_order_appends_stay_sorted() {
        let log = InMemoryAttemptLog::new();
        let t0 = Utc::now();

        log.append(record("x", "search", false, t0 + Duration::seconds(5)))
            .await
            .unwrap();
        log.append(record("x", "search", true, t0)).await.unwrap();

        let found = log.since(&Identifier::new("x"), "search", t0).await.unwrap();
        assert!(found[0].occurred_at <= found[1].occurred_at);
    }

    #[tokio::test]
    async fn test_prune_drops_old_records_and_empty_shards() {
        let log = InMemoryAttemptLog::new();
        let t0 = Utc::now();

        log.append(record("x", "search", false, t0)).await.unwrap();
        log.append(record("y", "search", false, t0 + Duration::hours(2)))
            .await
            .unwrap();

        let removed = log.prune(t0 + Duration::hours(1)).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records.len(), 1);
    }
}
