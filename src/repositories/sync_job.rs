//! # SyncJob Repository
//!
//! Read and write access to the sync_jobs table. Claiming and completing jobs goes through
//! [`crate::ledger::JobLedger`], which reuses the connection-generic helpers below inside its
//! transactions.

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::connector::{from_db_count, from_db_time, to_db_count};
use crate::domain::{SyncJob, SyncStatus};
use crate::error::StoreError;
use crate::models::sync_job::{self, Column, Entity};

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<SyncJob>, StoreError> {
        Entity::find_by_id(job_id)
            .one(&*self.db)
            .await
            .map_err(|e| StoreError::database("failed to load sync job", e))?
            .map(to_job)
            .transpose()
    }

    /// Returns the running job for a connector, if any.
    pub async fn find_in_progress(&self, connector_id: &str) -> Result<Option<SyncJob>, StoreError> {
        find_in_progress(&*self.db, connector_id).await
    }

    /// Lists jobs for a connector, newest first.
    pub async fn list_for_connector(
        &self,
        connector_id: &str,
        limit: u64,
    ) -> Result<Vec<SyncJob>, StoreError> {
        Entity::find()
            .filter(Column::ConnectorId.eq(connector_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await
            .map_err(|e| StoreError::database("failed to list sync jobs", e))?
            .into_iter()
            .map(to_job)
            .collect()
    }

    /// Inserts `job`, or overwrites the stored row when it already exists.
    pub async fn save(&self, job: &SyncJob) -> Result<SyncJob, StoreError> {
        let exists = Entity::find_by_id(job.id)
            .one(&*self.db)
            .await
            .map_err(|e| StoreError::database("failed to load sync job", e))?
            .is_some();

        if exists {
            to_active_model(job)
                .update(&*self.db)
                .await
                .map_err(|e| StoreError::database("failed to update sync job", e))
                .and_then(to_job)
        } else {
            insert_job(&*self.db, job).await
        }
    }
}

pub(crate) async fn find_in_progress<C: ConnectionTrait>(
    conn: &C,
    connector_id: &str,
) -> Result<Option<SyncJob>, StoreError> {
    Entity::find()
        .filter(Column::ConnectorId.eq(connector_id))
        .filter(Column::Status.eq(SyncStatus::InProgress.as_str()))
        .one(conn)
        .await
        .map_err(|e| StoreError::database("failed to look up in-progress sync job", e))?
        .map(to_job)
        .transpose()
}

/// Inserts a job row, handing back the raw database error so callers can detect the
/// in-progress uniqueness guard.
pub(crate) async fn try_insert_job<C: ConnectionTrait>(
    conn: &C,
    job: &SyncJob,
) -> Result<SyncJob, sea_orm::DbErr> {
    let model = to_active_model(job).insert(conn).await?;
    to_job(model).map_err(|e| sea_orm::DbErr::Custom(e.to_string()))
}

pub(crate) async fn insert_job<C: ConnectionTrait>(
    conn: &C,
    job: &SyncJob,
) -> Result<SyncJob, StoreError> {
    try_insert_job(conn, job)
        .await
        .map_err(|e| StoreError::database("failed to insert sync job", e))
}

fn to_active_model(job: &SyncJob) -> sync_job::ActiveModel {
    sync_job::ActiveModel {
        id: Set(job.id),
        connector_id: Set(job.connector_id.clone()),
        status: Set(job.status.as_str().to_string()),
        indexed_document_count: Set(to_db_count(job.indexed_document_count)),
        deleted_document_count: Set(to_db_count(job.deleted_document_count)),
        error: Set(job.error.clone()),
        worker_hostname: Set(job.worker_hostname.clone()),
        created_at: Set(job.created_at.fixed_offset()),
        completed_at: Set(job.completed_at.map(|t| t.fixed_offset())),
    }
}

pub(crate) fn to_job(model: sync_job::Model) -> Result<SyncJob, StoreError> {
    Ok(SyncJob {
        id: model.id,
        status: model.status.parse()?,
        connector_id: model.connector_id,
        created_at: from_db_time(model.created_at),
        completed_at: model.completed_at.map(from_db_time),
        indexed_document_count: from_db_count(model.indexed_document_count),
        deleted_document_count: from_db_count(model.deleted_document_count),
        error: model.error,
        worker_hostname: model.worker_hostname,
    })
}
