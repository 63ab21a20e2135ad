//! Integration tests for startup verification and shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use connector_sync::config::{AppConfig, IndexBackend, RunnerConfig};
use connector_sync::connectors::{
    Connector, ConnectorError, DocumentStream, EXAMPLE_SERVICE_TYPE, Registry,
};
use connector_sync::domain::{ConfigurableField, ConnectorStatus, SyncStatus};
use connector_sync::index::MemoryIndex;
use connector_sync::orchestrator::SYNC_INTERRUPTED;
use connector_sync::repositories::{ConnectorRepository, SyncJobRepository};
use connector_sync::runner::{Runner, StartupError, verify_connector};
use tokio_util::sync::CancellationToken;

const HOURLY: &str = "0 0 * * * ?";
const STALLING: &str = "stalling";

/// Healthy, but never finishes producing documents.
struct StallingConnector;

#[async_trait]
impl Connector for StallingConnector {
    fn service_type(&self) -> &str {
        STALLING
    }

    fn display_name(&self) -> &str {
        "Stalling"
    }

    fn configurable_fields(&self) -> Vec<ConfigurableField> {
        Vec::new()
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn produce_documents(&self) -> Result<DocumentStream, ConnectorError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(DocumentStream::from_documents(Vec::new()))
    }
}

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{EVERY_MINUTE, seed_connector, setup_test_db, setup_test_db_arc};

fn app_config(connector_id: Option<&str>) -> AppConfig {
    AppConfig {
        connector_id: connector_id.map(str::to_string),
        index_backend: IndexBackend::Memory,
        runner: RunnerConfig {
            polling_interval_ms: 100,
            heartbeat_interval_ms: 60_000,
            termination_timeout_ms: 5_000,
        },
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn verify_assigns_configured_service_type() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", None, EVERY_MINUTE).await?;
    let repo = ConnectorRepository::new(db.clone());

    let state = verify_connector(
        &repo,
        &Registry::with_builtin_connectors(),
        "conn-1",
        Some(EXAMPLE_SERVICE_TYPE),
    )
    .await?;

    assert_eq!(state.service_type.as_deref(), Some(EXAMPLE_SERVICE_TYPE));
    let stored = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(stored.service_type.as_deref(), Some(EXAMPLE_SERVICE_TYPE));
    Ok(())
}

#[tokio::test]
async fn verify_accepts_stored_service_type() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some(EXAMPLE_SERVICE_TYPE), EVERY_MINUTE).await?;
    let repo = ConnectorRepository::new(db.clone());

    let state = verify_connector(&repo, &Registry::with_builtin_connectors(), "conn-1", None)
        .await?;
    assert_eq!(state.service_type.as_deref(), Some(EXAMPLE_SERVICE_TYPE));
    Ok(())
}

#[tokio::test]
async fn verify_rejects_mismatched_service_type() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", Some(EXAMPLE_SERVICE_TYPE), EVERY_MINUTE).await?;
    let repo = ConnectorRepository::new(db.clone());

    let result = verify_connector(
        &repo,
        &Registry::with_builtin_connectors(),
        "conn-1",
        Some("confluence"),
    )
    .await;

    match result {
        Err(StartupError::ServiceTypeMismatch {
            stored, configured, ..
        }) => {
            assert_eq!(stored, EXAMPLE_SERVICE_TYPE);
            assert_eq!(configured, "confluence");
        }
        other => panic!("expected ServiceTypeMismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn verify_rejects_unregistered_service_type() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", None, EVERY_MINUTE).await?;
    let repo = ConnectorRepository::new(db.clone());

    let result = verify_connector(
        &repo,
        &Registry::with_builtin_connectors(),
        "conn-1",
        Some("confluence"),
    )
    .await;

    match result {
        Err(StartupError::UnknownServiceType {
            service_type,
            available,
        }) => {
            assert_eq!(service_type, "confluence");
            assert!(available.contains(&EXAMPLE_SERVICE_TYPE.to_string()));
        }
        other => panic!("expected UnknownServiceType, got {other:?}"),
    }

    // Nothing was written for a rejected service type.
    let stored = repo.get("conn-1").await?.expect("connector exists");
    assert!(stored.service_type.is_none());
    Ok(())
}

#[tokio::test]
async fn verify_requires_some_service_type() -> Result<()> {
    let db = setup_test_db_arc().await?;
    seed_connector(&db, "conn-1", None, EVERY_MINUTE).await?;
    let repo = ConnectorRepository::new(db.clone());

    let result = verify_connector(&repo, &Registry::with_builtin_connectors(), "conn-1", None).await;
    assert!(matches!(result, Err(StartupError::MissingServiceType { .. })));
    Ok(())
}

#[tokio::test]
async fn verify_rejects_missing_connector() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());

    let result = verify_connector(
        &repo,
        &Registry::with_builtin_connectors(),
        "ghost",
        Some(EXAMPLE_SERVICE_TYPE),
    )
    .await;
    assert!(matches!(
        result,
        Err(StartupError::ConnectorNotFound { connector_id }) if connector_id == "ghost"
    ));
    Ok(())
}

#[tokio::test]
async fn start_requires_connector_id() -> Result<()> {
    let db = setup_test_db().await?;

    let result = Runner::start(&app_config(None), db, Registry::with_builtin_connectors()).await;
    assert!(matches!(result, Err(StartupError::MissingConnectorId)));
    Ok(())
}

#[tokio::test]
async fn runner_syncs_and_stops_on_shutdown() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let mut state = seed_connector(&db, "conn-1", Some(EXAMPLE_SERVICE_TYPE), HOURLY).await?;
    state.sync_now = true;
    ConnectorRepository::new(db.clone()).save(&state).await?;

    let index = Arc::new(MemoryIndex::new());
    let runner = Runner::with_index(
        &app_config(Some("conn-1")),
        (*db).clone(),
        Registry::with_builtin_connectors(),
        index.clone(),
    )
    .await?;

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(runner.run_until(shutdown.clone()));

    // Configure on the first cycle, sync on the second.
    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await???;

    assert_eq!(index.ids("search-conn-1").len(), 10);
    let jobs = SyncJobRepository::new(db.clone())
        .list_for_connector("conn-1", 10)
        .await?;
    assert_eq!(jobs.len(), 1);
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_stalled_sync_and_completes_its_job() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = ConnectorRepository::new(db.clone());
    let mut state = seed_connector(&db, "conn-1", Some(STALLING), HOURLY).await?;
    state.set_status(ConnectorStatus::Configured, None)?;
    state.sync_now = true;
    repo.save(&state).await?;

    let mut registry = Registry::with_builtin_connectors();
    registry.register(STALLING, |_state| {
        let connector: Arc<dyn Connector> = Arc::new(StallingConnector);
        Ok(connector)
    });

    let mut config = app_config(Some("conn-1"));
    config.runner.termination_timeout_ms = 300;
    let runner =
        Runner::with_index(&config, (*db).clone(), registry, Arc::new(MemoryIndex::new())).await?;

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(runner.run_until(shutdown.clone()));

    let jobs = SyncJobRepository::new(db.clone());
    let claimed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(job) = jobs.find_in_progress("conn-1").await? {
                return anyhow::Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await??;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await???;

    assert!(jobs.find_in_progress("conn-1").await?.is_none());
    let job = jobs.get(claimed.id).await?.expect("job stored");
    assert_eq!(job.status, SyncStatus::Error);
    assert_eq!(job.error.as_deref(), Some(SYNC_INTERRUPTED));

    let stored = repo.get("conn-1").await?.expect("connector exists");
    assert_eq!(stored.sync_status, Some(SyncStatus::Error));
    assert_eq!(stored.error(), Some(SYNC_INTERRUPTED));
    Ok(())
}
