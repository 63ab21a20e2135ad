//! Job Ledger
//!
//! Guarantees at most one in-flight sync job per connector. A claim write-locks the connector
//! row, checks for a running job, inserts the new one and marks the connector as syncing in a
//! single transaction. The lock is the first statement so a concurrent claim waits for the
//! winner to commit and then sees its job; on SQLite a transaction that reads first gets
//! `SQLITE_BUSY` instead of waiting. The partial unique index on
//! `sync_jobs (connector_id) WHERE status = 'in_progress'` still rejects writers that skip the
//! lock.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{DatabaseConnection, TransactionTrait};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{SyncCompletion, SyncJob, SyncStatus};
use crate::error::{StoreError, is_unique_violation};
use crate::models::sync_job::{self, Entity as SyncJobEntity};
use crate::repositories::connector::{
    SYNC_COMPLETED_COLUMNS, SYNC_STARTED_COLUMNS, find_connector, lock_connector, to_db_count,
    write_connector_columns,
};
use crate::repositories::sync_job::{find_in_progress, try_insert_job};
use crate::telemetry::{JOBS_CLAIMED_TOTAL, JOBS_TOTAL};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Sync job [{job_id}] for connector [{connector_id}] is already running!")]
    AlreadyRunning { connector_id: String, job_id: Uuid },
    #[error("sync job [{job_id}] is not in progress")]
    JobNotInProgress { job_id: Uuid },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Claims and completes sync jobs against the connector store.
#[derive(Debug, Clone)]
pub struct JobLedger {
    db: Arc<DatabaseConnection>,
    worker_hostname: String,
}

impl JobLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            worker_hostname: local_hostname(),
        }
    }

    pub fn with_worker_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.worker_hostname = hostname.into();
        self
    }

    /// Creates an in-progress job for `connector_id` and marks the connector as syncing.
    ///
    /// Fails with [`LedgerError::AlreadyRunning`] when another job is still in progress.
    pub async fn claim(&self, connector_id: &str) -> Result<SyncJob, LedgerError> {
        let now = Utc::now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| StoreError::database("failed to begin claim transaction", e))?;

        lock_connector(&txn, connector_id, now).await?;

        if let Some(running) = find_in_progress(&txn, connector_id).await? {
            return Err(LedgerError::AlreadyRunning {
                connector_id: connector_id.to_string(),
                job_id: running.id,
            });
        }

        let mut connector =
            find_connector(&txn, connector_id)
                .await?
                .ok_or_else(|| StoreError::ConnectorNotFound {
                    connector_id: connector_id.to_string(),
                })?;

        let candidate = SyncJob {
            id: Uuid::new_v4(),
            connector_id: connector_id.to_string(),
            status: SyncStatus::InProgress,
            created_at: now,
            completed_at: None,
            indexed_document_count: 0,
            deleted_document_count: 0,
            error: None,
            worker_hostname: Some(self.worker_hostname.clone()),
        };

        let job = match try_insert_job(&txn, &candidate).await {
            Ok(job) => job,
            Err(err) if is_unique_violation(&err) => {
                // Lost the race to a writer outside this transaction.
                drop(txn);
                return Err(self.already_running(connector_id, err).await);
            }
            Err(err) => return Err(StoreError::database("failed to insert sync job", err).into()),
        };

        connector.mark_sync_started(now);
        write_connector_columns(&txn, &connector, SYNC_STARTED_COLUMNS).await?;

        txn.commit()
            .await
            .map_err(|e| StoreError::database("failed to commit claim transaction", e))?;

        counter!(JOBS_CLAIMED_TOTAL).increment(1);
        info!(
            connector_id,
            job_id = %job.id,
            worker_hostname = %self.worker_hostname,
            "Sync job claimed"
        );

        Ok(job)
    }

    /// Finishes a claimed job and records the outcome on the connector.
    ///
    /// Only a job that is still in progress can be completed; a second completion fails with
    /// [`LedgerError::JobNotInProgress`].
    pub async fn complete(
        &self,
        job: &SyncJob,
        completion: &SyncCompletion,
    ) -> Result<SyncJob, LedgerError> {
        let now = Utc::now();
        let status = completion.status();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| StoreError::database("failed to begin completion transaction", e))?;

        let result = SyncJobEntity::update_many()
            .col_expr(sync_job::Column::Status, Expr::value(status.as_str()))
            .col_expr(sync_job::Column::CompletedAt, Expr::value(now.fixed_offset()))
            .col_expr(
                sync_job::Column::IndexedDocumentCount,
                Expr::value(to_db_count(completion.indexed)),
            )
            .col_expr(
                sync_job::Column::DeletedDocumentCount,
                Expr::value(to_db_count(completion.deleted)),
            )
            .col_expr(sync_job::Column::Error, Expr::value(completion.error.clone()))
            .filter(sync_job::Column::Id.eq(job.id))
            .filter(sync_job::Column::Status.eq(SyncStatus::InProgress.as_str()))
            .exec(&txn)
            .await
            .map_err(|e| StoreError::database("failed to complete sync job", e))?;

        if result.rows_affected == 0 {
            return Err(LedgerError::JobNotInProgress { job_id: job.id });
        }

        match find_connector(&txn, &job.connector_id).await? {
            Some(mut connector) => {
                connector.mark_sync_completed(completion);
                write_connector_columns(&txn, &connector, SYNC_COMPLETED_COLUMNS).await?;
            }
            None => warn!(
                connector_id = %job.connector_id,
                job_id = %job.id,
                "Connector disappeared before its sync job completed"
            ),
        }

        txn.commit()
            .await
            .map_err(|e| StoreError::database("failed to commit completion transaction", e))?;

        counter!(JOBS_TOTAL, "outcome" => status.as_str()).increment(1);
        info!(
            connector_id = %job.connector_id,
            job_id = %job.id,
            status = %status,
            indexed = completion.indexed,
            deleted = completion.deleted,
            error = completion.error.as_deref(),
            "Sync job completed"
        );

        Ok(SyncJob {
            status,
            completed_at: Some(now),
            indexed_document_count: completion.indexed,
            deleted_document_count: completion.deleted,
            error: completion.error.clone(),
            ..job.clone()
        })
    }

    async fn already_running(&self, connector_id: &str, insert_err: DbErr) -> LedgerError {
        match find_in_progress(&*self.db, connector_id).await {
            Ok(Some(running)) => LedgerError::AlreadyRunning {
                connector_id: connector_id.to_string(),
                job_id: running.id,
            },
            Ok(None) => StoreError::database("failed to insert sync job", insert_err).into(),
            Err(err) => err.into(),
        }
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
