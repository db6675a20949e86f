//! PostgreSQL attempt log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DbConn, EntityTrait, QueryFilter, QueryOrder};

use tollgate_core::domain::{AttemptRecord, Identifier};
use tollgate_core::ports::{AttemptLog, AttemptLogError};

use crate::database::entity::attempt::{self, Entity as AttemptEntity};

/// Append-only attempt log stored in the `attempt_log` table.
pub struct PostgresAttemptLog {
    pub(crate) db: DbConn,
}

impl PostgresAttemptLog {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

fn classify(err: sea_orm::DbErr) -> AttemptLogError {
    match err {
        sea_orm::DbErr::Conn(e) => AttemptLogError::Unavailable(e.to_string()),
        sea_orm::DbErr::ConnectionAcquire(e) => AttemptLogError::Unavailable(e.to_string()),
        other => AttemptLogError::Query(other.to_string()),
    }
}

#[async_trait]
impl AttemptLog for PostgresAttemptLog {
    async fn append(&self, record: AttemptRecord) -> Result<(), AttemptLogError> {
        tracing::debug!(
            identifier = %record.identifier,
            action_type = %record.action_type,
            success = record.success,
            "Appending attempt"
        );

        let active: attempt::ActiveModel = record.into();
        AttemptEntity::insert(active)
            .exec_without_returning(&self.db)
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn since(
        &self,
        identifier: &Identifier,
        action_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttemptRecord>, AttemptLogError> {
        let rows = AttemptEntity::find()
            .filter(attempt::Column::Identifier.eq(identifier.as_str()))
            .filter(attempt::Column::ActionType.eq(action_type))
            .filter(attempt::Column::OccurredAt.gte(since))
            .order_by_asc(attempt::Column::OccurredAt)
            .all(&self.db)
            .await
            .map_err(classify)?;

        rows.into_iter().map(AttemptRecord::try_from).collect()
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64, AttemptLogError> {
        let result = AttemptEntity::delete_many()
            .filter(attempt::Column::OccurredAt.lt(cutoff))
            .exec(&self.db)
            .await
            .map_err(classify)?;

        tracing::info!(removed = result.rows_affected, cutoff = %cutoff, "Pruned attempt log");
        Ok(result.rows_affected)
    }
}
