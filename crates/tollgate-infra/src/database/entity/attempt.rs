//! Attempt log entity for SeaORM.

use sea_orm::Set;
use sea_orm::entity::prelude::*;

use tollgate_core::domain::{AttemptMetadata, AttemptRecord, Identifier};
use tollgate_core::ports::AttemptLogError;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "attempt_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub identifier: String,
    pub action_type: String,
    pub success: bool,
    pub occurred_at: DateTimeWithTimeZone,
    pub metadata: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Conversion from SeaORM Model to a domain record.
impl TryFrom<Model> for AttemptRecord {
    type Error = AttemptLogError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let metadata: AttemptMetadata = serde_json::from_value(model.metadata)
            .map_err(|e| AttemptLogError::Query(format!("bad metadata on {}: {e}", model.id)))?;

        Ok(Self {
            id: model.id,
            identifier: Identifier::new(model.identifier),
            action_type: model.action_type,
            success: model.success,
            occurred_at: model.occurred_at.into(),
            metadata,
        })
    }
}

/// Conversion from a domain record to SeaORM ActiveModel.
impl From<AttemptRecord> for ActiveModel {
    fn from(record: AttemptRecord) -> Self {
        let metadata = serde_json::to_value(&record.metadata).unwrap_or_default();

        Self {
            id: Set(record.id),
            identifier: Set(record.identifier.as_str().to_string()),
            action_type: Set(record.action_type),
            success: Set(record.success),
            occurred_at: Set(record.occurred_at.into()),
            metadata: Set(metadata),
        }
    }
}
