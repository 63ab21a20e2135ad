//! # Runner
//!
//! Process wiring: builds the search index and orchestrator from configuration, verifies the
//! connector record before the loop starts, and bounds how long shutdown waits for the loop.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, IndexBackend};
use crate::connectors::Registry;
use crate::db::DatabaseError;
use crate::domain::ConnectorState;
use crate::error::StoreError;
use crate::index::{ElasticsearchIndex, IndexError, MemoryIndex, SearchIndex};
use crate::ledger::JobLedger;
use crate::orchestrator::ConnectorOrchestrator;
use crate::reconciler::DocumentReconciler;
use crate::repositories::ConnectorRepository;

/// Reasons the runner refuses to start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no connector id configured; set CONNECTOR_SYNC_CONNECTOR_ID or pass --connector-id")]
    MissingConnectorId,
    #[error("connector [{connector_id}] does not exist")]
    ConnectorNotFound { connector_id: String },
    #[error(
        "connector [{connector_id}] has no service type; set CONNECTOR_SYNC_CONNECTOR_SERVICE_TYPE"
    )]
    MissingServiceType { connector_id: String },
    #[error(
        "connector [{connector_id}] has service type '{stored}' but this runner is configured for '{configured}'"
    )]
    ServiceTypeMismatch {
        connector_id: String,
        stored: String,
        configured: String,
    },
    #[error("service type '{service_type}' is not registered (available: {available:?})")]
    UnknownServiceType {
        service_type: String,
        available: Vec<String>,
    },
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Reasons shutdown did not complete cleanly.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("control loop did not stop within {timeout_ms} ms")]
    TerminationTimeout { timeout_ms: u64 },
    #[error("control loop task failed: {0}")]
    LoopFailed(#[from] tokio::task::JoinError),
}

/// Builds the configured search index implementation.
pub fn build_index(config: &AppConfig) -> Result<Arc<dyn SearchIndex>, IndexError> {
    match config.index_backend {
        IndexBackend::Elasticsearch => {
            Ok(Arc::new(ElasticsearchIndex::new(&config.elasticsearch)?))
        }
        IndexBackend::Memory => {
            warn!("Using the in-memory index; documents are lost when the process exits");
            Ok(Arc::new(MemoryIndex::new()))
        }
    }
}

/// Checks that the connector exists and can be served by this process.
///
/// A record without a service type adopts `configured_service_type`. A record whose service
/// type differs from the configured one is rejected.
pub async fn verify_connector(
    connectors: &ConnectorRepository,
    registry: &Registry,
    connector_id: &str,
    configured_service_type: Option<&str>,
) -> Result<ConnectorState, StartupError> {
    let state = connectors
        .get(connector_id)
        .await?
        .ok_or_else(|| StartupError::ConnectorNotFound {
            connector_id: connector_id.to_string(),
        })?;

    let service_type = match (state.service_type.as_deref(), configured_service_type) {
        (None, None) => {
            return Err(StartupError::MissingServiceType {
                connector_id: connector_id.to_string(),
            });
        }
        (Some(stored), Some(configured)) if stored != configured => {
            return Err(StartupError::ServiceTypeMismatch {
                connector_id: connector_id.to_string(),
                stored: stored.to_string(),
                configured: configured.to_string(),
            });
        }
        (Some(stored), _) => stored.to_string(),
        (None, Some(configured)) => configured.to_string(),
    };

    if !registry.contains(&service_type) {
        return Err(StartupError::UnknownServiceType {
            service_type,
            available: registry.service_types(),
        });
    }

    if state.service_type.is_none() {
        info!(connector_id, %service_type, "Assigning service type to connector");
        return Ok(connectors
            .update_service_type(connector_id, &service_type)
            .await?);
    }

    Ok(state)
}

/// A verified connector loop, ready to run.
pub struct Runner {
    orchestrator: ConnectorOrchestrator,
    termination_timeout: Duration,
}

impl Runner {
    /// Wires the runner using the index backend selected in `config`.
    pub async fn start(
        config: &AppConfig,
        db: DatabaseConnection,
        registry: Registry,
    ) -> Result<Self, StartupError> {
        let index = build_index(config)?;
        Self::with_index(config, db, registry, index).await
    }

    /// Wires the runner against an already built index.
    pub async fn with_index(
        config: &AppConfig,
        db: DatabaseConnection,
        registry: Registry,
        index: Arc<dyn SearchIndex>,
    ) -> Result<Self, StartupError> {
        let connector_id = config
            .connector_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(StartupError::MissingConnectorId)?;

        let db = Arc::new(db);
        let connectors = ConnectorRepository::new(db.clone());
        let state = verify_connector(
            &connectors,
            &registry,
            &connector_id,
            config.connector_service_type.as_deref(),
        )
        .await?;

        info!(
            connector_id = %state.id,
            service_type = state.service_type.as_deref().unwrap_or_default(),
            index_name = %state.index_name,
            status = %state.status(),
            "Connector verified"
        );

        let orchestrator = ConnectorOrchestrator::new(
            connector_id,
            connectors,
            JobLedger::new(db),
            Arc::new(registry),
            Arc::new(DocumentReconciler::new(index, config.index_batch_size)),
            &config.runner,
        );

        Ok(Self {
            orchestrator,
            termination_timeout: config.runner.termination_timeout(),
        })
    }

    /// Runs the control loop until `shutdown` fires, then waits up to the termination timeout
    /// for the current cycle to finish.
    ///
    /// A sync still running after the timeout is interrupted and its job completed as failed.
    /// The loop is only aborted when that completion does not land within a second timeout.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<(), ShutdownError> {
        let orchestrator = self.orchestrator;
        let interrupt = orchestrator.interrupt_token();
        let loop_token = shutdown.clone();
        let mut handle = tokio::spawn(async move { orchestrator.run(loop_token).await });

        tokio::select! {
            result = &mut handle => {
                // The loop only returns on cancellation; reaching this arm means it panicked.
                result?;
                return Ok(());
            }
            _ = shutdown.cancelled() => {}
        }

        info!(
            timeout_ms = self.termination_timeout.as_millis() as u64,
            "Shutdown requested, waiting for control loop"
        );

        if let Ok(result) = tokio::time::timeout(self.termination_timeout, &mut handle).await {
            result?;
            info!("Runner stopped");
            return Ok(());
        }

        warn!("Control loop did not stop in time, interrupting the running sync");
        interrupt.cancel();

        match tokio::time::timeout(self.termination_timeout, &mut handle).await {
            Ok(result) => {
                result?;
                info!("Runner stopped after interrupting the running sync");
                Ok(())
            }
            Err(_) => {
                error!("Control loop did not stop after the interrupt, aborting");
                handle.abort();
                Err(ShutdownError::TerminationTimeout {
                    timeout_ms: self.termination_timeout.as_millis() as u64,
                })
            }
        }
    }
}
