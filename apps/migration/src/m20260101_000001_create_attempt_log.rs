use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AttemptLog::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AttemptLog::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(AttemptLog::Identifier).string().not_null())
                    .col(ColumnDef::new(AttemptLog::ActionType).string().not_null())
                    .col(ColumnDef::new(AttemptLog::Success).boolean().not_null())
                    .col(
                        ColumnDef::new(AttemptLog::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AttemptLog::Metadata)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'{}'::jsonb")),
                    )
                    .to_owned(),
            )
            .await?;

        // Every decision reads one (identifier, action_type) slice by time
        manager
            .create_index(
                Index::create()
                    .name("idx_attempt_log_lookup")
                    .table(AttemptLog::Table)
                    .col(AttemptLog::Identifier)
                    .col(AttemptLog::ActionType)
                    .col(AttemptLog::OccurredAt)
                    .to_owned(),
            )
            .await?;

        // Retention deletes by age alone
        manager
            .create_index(
                Index::create()
                    .name("idx_attempt_log_occurred_at")
                    .table(AttemptLog::Table)
                    .col(AttemptLog::OccurredAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AttemptLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AttemptLog {
    Table,
    Id,
    Identifier,
    ActionType,
    Success,
    OccurredAt,
    Metadata,
}
