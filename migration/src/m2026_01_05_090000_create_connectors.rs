//! Migration to create the connectors table.
//!
//! One row per configured connector: lifecycle status, schedule, last sync outcome and the
//! configuration values persisted from the connector's declared fields.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connectors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connectors::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connectors::Name).text().not_null())
                    .col(ColumnDef::new(Connectors::IndexName).text().not_null())
                    .col(ColumnDef::new(Connectors::ServiceType).text().null())
                    .col(
                        ColumnDef::new(Connectors::Status)
                            .text()
                            .not_null()
                            .default("created"),
                    )
                    .col(ColumnDef::new(Connectors::SyncStatus).text().null())
                    .col(
                        ColumnDef::new(Connectors::SchedulingEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Connectors::SchedulingInterval).text().null())
                    .col(
                        ColumnDef::new(Connectors::SyncNow)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Connectors::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connectors::LastSeenAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Connectors::LastSyncError).text().null())
                    .col(ColumnDef::new(Connectors::Error).text().null())
                    .col(ColumnDef::new(Connectors::Configuration).json_binary().not_null())
                    .col(
                        ColumnDef::new(Connectors::LastIndexedDocumentCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Connectors::LastDeletedDocumentCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Connectors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connectors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Connectors::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connectors {
    Table,
    Id,
    Name,
    IndexName,
    ServiceType,
    Status,
    SyncStatus,
    SchedulingEnabled,
    SchedulingInterval,
    SyncNow,
    LastSyncedAt,
    LastSeenAt,
    LastSyncError,
    Error,
    Configuration,
    LastIndexedDocumentCount,
    LastDeletedDocumentCount,
    CreatedAt,
    UpdatedAt,
}
