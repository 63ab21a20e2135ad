//! Migration to create the sync_jobs table.
//!
//! Each row records one sync attempt for a connector. Rows are append-only: a job is inserted
//! when claimed and updated exactly once when it completes.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::ConnectorId).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("in_progress"),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::IndexedDocumentCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::DeletedDocumentCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::Error).text().null())
                    .col(ColumnDef::new(SyncJobs::WorkerHostname).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_jobs_connector_id")
                            .from(SyncJobs::Table, SyncJobs::ConnectorId)
                            .to(Connectors::Table, Connectors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // History lookups per connector, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_connector_created")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::ConnectorId)
                    .col(SyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_jobs_connector_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    ConnectorId,
    Status,
    IndexedDocumentCount,
    DeletedDocumentCount,
    Error,
    WorkerHostname,
    CreatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum Connectors {
    Table,
    Id,
}
