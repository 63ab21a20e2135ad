//! Connector Orchestrator
//!
//! The per-connector control loop. Each cycle reloads the connector record, configures it on
//! first sight, runs a health check when one is due and, when the schedule says so, claims a
//! sync job, reconciles the index on a separate task and records the outcome. Cycles are
//! strictly sequential and a failing cycle never stops the loop.
//!
//! Every claimed job is completed exactly once. A completion the store rejects is retried with
//! backoff, then held and retried at the start of the next cycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::connectors::{Connector, ConnectorError, Registry, RegistryError};
use crate::domain::{ConnectorState, ConnectorStatus, SyncCompletion, SyncJob};
use crate::error::StoreError;
use crate::ledger::{JobLedger, LedgerError};
use crate::reconciler::{DocumentReconciler, ReconcileError};
use crate::repositories::ConnectorRepository;
use crate::telemetry::{CYCLE_DURATION_MS, HEARTBEATS_TOTAL};

/// Error recorded on a job whose sync was stopped by [`ConnectorOrchestrator::interrupt_token`].
pub const SYNC_INTERRUPTED: &str = "sync interrupted by shutdown";

const COMPLETE_ATTEMPTS: u32 = 3;
const COMPLETE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No connector record exists for the configured id.
    ConnectorMissing,
    /// The connector was configured for the first time; nothing else ran.
    Configured(ConnectorStatus),
    /// No sync was due.
    Idle,
    /// The scheduling interval could not be evaluated and the connector was marked as errored.
    InvalidSchedule,
    /// Another worker holds the in-progress job.
    AlreadyRunning { job_id: Uuid },
    /// A sync ran; the job carries its final status and counts.
    Synced(SyncJob),
}

pub struct ConnectorOrchestrator {
    connector_id: String,
    connectors: ConnectorRepository,
    ledger: JobLedger,
    registry: Arc<Registry>,
    reconciler: Arc<DocumentReconciler>,
    polling_interval: Duration,
    heartbeat_interval: chrono::Duration,
    interrupt: CancellationToken,
    unfinished: Mutex<Option<(SyncJob, SyncCompletion)>>,
}

impl ConnectorOrchestrator {
    pub fn new(
        connector_id: impl Into<String>,
        connectors: ConnectorRepository,
        ledger: JobLedger,
        registry: Arc<Registry>,
        reconciler: Arc<DocumentReconciler>,
        runner: &RunnerConfig,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            connectors,
            ledger,
            registry,
            reconciler,
            polling_interval: runner.polling_interval(),
            heartbeat_interval: runner.heartbeat_interval(),
            interrupt: CancellationToken::new(),
            unfinished: Mutex::new(None),
        }
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    /// Cancelling this token stops the in-flight sync. Its job is completed as failed with
    /// [`SYNC_INTERRUPTED`] and every later sync is interrupted as soon as it starts, so only
    /// cancel it once the loop is shutting down.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Run cycles until `shutdown` fires. Cancellation is observed between cycles only, so an
    /// in-flight sync always reaches `complete`.
    #[instrument(skip_all, fields(connector_id = %self.connector_id))]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            polling_interval_ms = self.polling_interval.as_millis() as u64,
            "Starting connector control loop"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let cycle_started = Instant::now();
            match self.run_cycle().await {
                Ok(outcome) => debug!(?outcome, "Cycle finished"),
                Err(err) => {
                    error!(error = %err, "Cycle failed");
                    self.record_cycle_error(&err).await;
                }
            }
            histogram!(CYCLE_DURATION_MS).record(cycle_started.elapsed().as_secs_f64() * 1_000.0);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.polling_interval) => {}
            }
        }

        info!("Connector control loop stopped");
    }

    /// One pass of configure, heartbeat and sync.
    #[instrument(skip_all, fields(connector_id = %self.connector_id))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome, OrchestratorError> {
        self.finish_held_completion().await?;

        let Some(state) = self.connectors.get(&self.connector_id).await? else {
            warn!("Connector record not found, skipping cycle");
            return Ok(CycleOutcome::ConnectorMissing);
        };
        debug!(status = %state.status(), "Loaded connector");

        let connector = self.registry.create(&state)?;

        if state.should_configure() {
            info!("Connector is not configured yet, storing its configurable fields");
            let configured = self
                .connectors
                .update_configuration(&self.connector_id, &connector.configurable_fields())
                .await?;
            return Ok(CycleOutcome::Configured(configured.status()));
        }

        let state = if state.should_heartbeat(self.heartbeat_interval, Utc::now()) {
            self.heartbeat(connector.as_ref()).await?
        } else {
            state
        };

        if !state.status_allows_sync() {
            debug!(status = %state.status(), "Connector status does not allow syncing");
            return Ok(CycleOutcome::Idle);
        }

        match state.should_sync(Utc::now()) {
            Ok(true) => self.sync(&state, connector).await,
            Ok(false) => {
                debug!("No sync due");
                Ok(CycleOutcome::Idle)
            }
            Err(err) => {
                warn!(error = %err, "Scheduling interval is invalid");
                self.connectors
                    .update_status(
                        &self.connector_id,
                        ConnectorStatus::Error,
                        Some(err.to_string()),
                    )
                    .await?;
                Ok(CycleOutcome::InvalidSchedule)
            }
        }
    }

    async fn heartbeat(&self, connector: &dyn Connector) -> Result<ConnectorState, StoreError> {
        let failure = match connector.health_check().await {
            Ok(()) => None,
            Err(err @ ConnectorError::HealthCheckFailed { .. }) => Some(err.to_string()),
            Err(err) => {
                Some(ConnectorError::health_check_failed(connector.display_name(), err).to_string())
            }
        };

        let outcome = if failure.is_some() { "error" } else { "ok" };
        counter!(HEARTBEATS_TOTAL, "outcome" => outcome).increment(1);
        if let Some(message) = &failure {
            warn!(error = %message, "Health check failed");
        }

        self.connectors.heartbeat(&self.connector_id, failure).await
    }

    async fn sync(
        &self,
        state: &ConnectorState,
        connector: Arc<dyn Connector>,
    ) -> Result<CycleOutcome, OrchestratorError> {
        let job = match self.ledger.claim(&self.connector_id).await {
            Ok(job) => job,
            Err(LedgerError::AlreadyRunning { job_id, .. }) => {
                info!(%job_id, "Sync already running, skipping");
                return Ok(CycleOutcome::AlreadyRunning { job_id });
            }
            Err(err) => return Err(err.into()),
        };
        info!(job_id = %job.id, index_name = %state.index_name, "Running sync");

        let reconciler = Arc::clone(&self.reconciler);
        let connector_id = self.connector_id.clone();
        let index_name = state.index_name.clone();
        let mut task = tokio::spawn(async move {
            let documents = connector
                .produce_documents()
                .await
                .map_err(ReconcileError::new)?;
            reconciler
                .reconcile(&connector_id, &index_name, documents)
                .await
        });

        let completion = tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(outcome)) => SyncCompletion::succeeded(outcome.indexed, outcome.deleted),
                Ok(Err(err)) => {
                    warn!(job_id = %job.id, error = %err, "Sync failed");
                    SyncCompletion::failed(err.indexed, err.deleted, failure_message(err.to_string()))
                }
                Err(join_err) => {
                    error!(job_id = %job.id, error = %join_err, "Sync task did not finish");
                    SyncCompletion::failed(0, 0, format!("sync task failed: {join_err}"))
                }
            },
            _ = self.interrupt.cancelled() => {
                task.abort();
                warn!(job_id = %job.id, "Sync interrupted before it finished");
                SyncCompletion::failed(0, 0, SYNC_INTERRUPTED)
            }
        };

        let job = self.finish(job, completion).await?;
        Ok(CycleOutcome::Synced(job))
    }

    /// Completes `job`, retrying store failures with backoff. When every attempt fails the
    /// completion is held for the next cycle.
    async fn finish(
        &self,
        job: SyncJob,
        completion: SyncCompletion,
    ) -> Result<SyncJob, LedgerError> {
        let mut delay = COMPLETE_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match self.ledger.complete(&job, &completion).await {
                Ok(done) => return Ok(done),
                Err(LedgerError::Store(err)) if attempt < COMPLETE_ATTEMPTS => {
                    warn!(
                        job_id = %job.id,
                        attempt,
                        error = %err,
                        "Could not complete sync job, retrying"
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err @ LedgerError::Store(_)) => {
                    error!(
                        job_id = %job.id,
                        error = %err,
                        "Could not complete sync job, holding it for the next cycle"
                    );
                    *self.held_completion() = Some((job, completion));
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn finish_held_completion(&self) -> Result<(), LedgerError> {
        let held = self.held_completion().take();
        let Some((job, completion)) = held else {
            return Ok(());
        };
        info!(job_id = %job.id, "Retrying held sync job completion");
        match self.finish(job, completion).await {
            Ok(_) => Ok(()),
            Err(LedgerError::JobNotInProgress { job_id }) => {
                warn!(%job_id, "Held sync job was already completed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn held_completion(&self) -> MutexGuard<'_, Option<(SyncJob, SyncCompletion)>> {
        self.unfinished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn record_cycle_error(&self, err: &OrchestratorError) {
        if matches!(
            err,
            OrchestratorError::Store(StoreError::ConnectorNotFound { .. })
        ) {
            return;
        }

        if let Err(store_err) = self
            .connectors
            .update_status(
                &self.connector_id,
                ConnectorStatus::Error,
                Some(failure_message(err.to_string())),
            )
            .await
        {
            warn!(error = %store_err, "Could not record cycle error on connector");
        }
    }
}

fn failure_message(message: String) -> String {
    if message.trim().is_empty() {
        "sync failed without an error message".to_string()
    } else {
        message
    }
}
