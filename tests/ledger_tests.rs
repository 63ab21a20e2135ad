//! Integration tests for claiming and completing sync jobs.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use connector_sync::domain::{ConnectorStatus, SyncCompletion, SyncJob, SyncStatus};
use connector_sync::error::{StoreError, is_unique_violation};
use connector_sync::ledger::{JobLedger, LedgerError};
use connector_sync::repositories::{ConnectorRepository, SyncJobRepository};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tempfile::TempDir;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{EVERY_MINUTE, seed_connector, setup_test_db_arc};

#[tokio::test]
async fn claim_marks_connector_as_syncing() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let mut seeded = seed_connector(&db, "conn-1", Some("example"), EVERY_MINUTE).await?;
    seeded.sync_now = true;
    ConnectorRepository::new(db.clone()).save(&seeded).await?;

    let ledger = JobLedger::new(db.clone()).with_worker_hostname("worker-a");
    let job = ledger.claim("conn-1").await?;

    assert_eq!(job.status, SyncStatus::InProgress);
    assert_eq!(job.worker_hostname.as_deref(), Some("worker-a"));

    let connector = ConnectorRepository::new(db.clone())
        .get("conn-1")
        .await?
        .expect("connector exists");
    assert_eq!(connector.sync_status, Some(SyncStatus::InProgress));
    assert!(!connector.sync_now);
    assert!(connector.last_synced_at.is_some());

    let running = SyncJobRepository::new(db.clone())
        .find_in_progress("conn-1")
        .await?
        .expect("job is in progress");
    assert_eq!(running.id, job.id);
    Ok(())
}

#[tokio::test]
async fn second_claim_reports_running_job() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some("example"), EVERY_MINUTE).await?;

    let ledger = JobLedger::new(db.clone());
    let first = ledger.claim("conn-1").await?;

    match ledger.claim("conn-1").await {
        Err(LedgerError::AlreadyRunning {
            connector_id,
            job_id,
        }) => {
            assert_eq!(connector_id, "conn-1");
            assert_eq!(job_id, first.id);
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    Ok(())
}

/// Opens a pool of its own on a shared SQLite file, as a second worker process would.
async fn connect_file_db(path: &Path) -> Result<Arc<DatabaseConnection>> {
    let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    options.max_connections(1).sqlx_logging(false);
    Ok(Arc::new(Database::connect(options).await?))
}

#[tokio::test]
async fn concurrent_claims_admit_exactly_one() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("sync.db");
    let db_a = connect_file_db(&path).await?;
    Migrator::up(&*db_a, None).await?;
    let db_b = connect_file_db(&path).await?;
    seed_connector(&db_a, "conn-1", Some("example"), EVERY_MINUTE).await?;

    let ledger_a = JobLedger::new(db_a.clone()).with_worker_hostname("worker-a");
    let ledger_b = JobLedger::new(db_b.clone()).with_worker_hostname("worker-b");

    let (a, b) = tokio::join!(ledger_a.claim("conn-1"), ledger_b.claim("conn-1"));

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    let already_running = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::AlreadyRunning { .. })))
        .count();
    assert_eq!(successes, 1, "claims: {a:?} / {b:?}");
    assert_eq!(already_running, 1, "claims: {a:?} / {b:?}");

    let jobs = SyncJobRepository::new(db_b.clone())
        .list_for_connector("conn-1", 10)
        .await?;
    assert_eq!(jobs.len(), 1);

    // The losing claim left the connector untouched.
    let connector = ConnectorRepository::new(db_b.clone())
        .get("conn-1")
        .await?
        .expect("connector exists");
    assert_eq!(connector.status(), ConnectorStatus::Created);
    assert_eq!(connector.sync_status, Some(SyncStatus::InProgress));
    Ok(())
}

#[tokio::test]
async fn store_rejects_a_second_in_progress_job() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some("example"), EVERY_MINUTE).await?;
    let jobs = SyncJobRepository::new(db.clone());

    let job = |worker: &str| SyncJob {
        id: Uuid::new_v4(),
        connector_id: "conn-1".to_string(),
        status: SyncStatus::InProgress,
        created_at: Utc::now(),
        completed_at: None,
        indexed_document_count: 0,
        deleted_document_count: 0,
        error: None,
        worker_hostname: Some(worker.to_string()),
    };

    jobs.save(&job("worker-a")).await?;
    match jobs.save(&job("worker-b")).await {
        Err(StoreError::Database { source, .. }) => assert!(is_unique_violation(&source)),
        other => panic!("expected unique violation, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn claim_for_missing_connector_fails() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let ledger = JobLedger::new(db.clone());

    let result = ledger.claim("missing").await;
    assert!(matches!(
        result,
        Err(LedgerError::Store(StoreError::ConnectorNotFound { .. }))
    ));
    Ok(())
}

#[tokio::test]
async fn complete_success_records_counts() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some("example"), EVERY_MINUTE).await?;
    let ledger = JobLedger::new(db.clone());

    let job = ledger.claim("conn-1").await?;
    let done = ledger
        .complete(&job, &SyncCompletion::succeeded(7, 2))
        .await?;

    assert_eq!(done.status, SyncStatus::Completed);
    assert!(done.completed_at.is_some());

    let stored = SyncJobRepository::new(db.clone())
        .get(job.id)
        .await?
        .expect("job stored");
    assert_eq!(stored.status, SyncStatus::Completed);
    assert_eq!(stored.indexed_document_count, 7);
    assert_eq!(stored.deleted_document_count, 2);

    let connector = ConnectorRepository::new(db.clone())
        .get("conn-1")
        .await?
        .expect("connector exists");
    assert_eq!(connector.status(), ConnectorStatus::Connected);
    assert_eq!(connector.sync_status, Some(SyncStatus::Completed));
    assert_eq!(connector.last_indexed_document_count, 7);
    assert_eq!(connector.last_deleted_document_count, 2);
    assert!(connector.error().is_none());
    Ok(())
}

#[tokio::test]
async fn complete_failure_marks_connector_error() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some("example"), EVERY_MINUTE).await?;
    let ledger = JobLedger::new(db.clone());

    let job = ledger.claim("conn-1").await?;
    let done = ledger
        .complete(&job, &SyncCompletion::failed(3, 0, "index unavailable"))
        .await?;
    assert_eq!(done.status, SyncStatus::Error);

    let connector = ConnectorRepository::new(db.clone())
        .get("conn-1")
        .await?
        .expect("connector exists");
    assert_eq!(connector.status(), ConnectorStatus::Error);
    assert_eq!(connector.error(), Some("index unavailable"));
    assert_eq!(connector.last_sync_error.as_deref(), Some("index unavailable"));
    assert_eq!(connector.sync_status, Some(SyncStatus::Error));

    // The failed sync is retried on the next evaluation.
    assert!(connector.should_sync(Utc::now())?);
    Ok(())
}

#[tokio::test]
async fn completing_twice_is_rejected() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some("example"), EVERY_MINUTE).await?;
    let ledger = JobLedger::new(db.clone());

    let job = ledger.claim("conn-1").await?;
    ledger
        .complete(&job, &SyncCompletion::succeeded(1, 0))
        .await?;

    let second = ledger
        .complete(&job, &SyncCompletion::failed(0, 0, "late failure"))
        .await;
    assert!(matches!(
        second,
        Err(LedgerError::JobNotInProgress { job_id }) if job_id == job.id
    ));

    let stored = SyncJobRepository::new(db.clone())
        .get(job.id)
        .await?
        .expect("job stored");
    assert_eq!(stored.status, SyncStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn new_claim_allowed_after_completion() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some("example"), EVERY_MINUTE).await?;
    let ledger = JobLedger::new(db.clone());

    let first = ledger.claim("conn-1").await?;
    ledger
        .complete(&first, &SyncCompletion::succeeded(0, 0))
        .await?;

    let second = ledger.claim("conn-1").await?;
    assert_ne!(first.id, second.id);

    let jobs = SyncJobRepository::new(db.clone())
        .list_for_connector("conn-1", 10)
        .await?;
    assert_eq!(jobs.len(), 2);
    Ok(())
}
