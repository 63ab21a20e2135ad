//! Telemetry setup: the global tracing subscriber and metric descriptions.

use std::any::type_name_of_val;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

pub const CYCLE_DURATION_MS: &str = "connector_sync_cycle_duration_ms";
pub const JOBS_CLAIMED_TOTAL: &str = "connector_sync_jobs_claimed_total";
pub const JOBS_TOTAL: &str = "connector_sync_jobs_total";
pub const DOCUMENTS_INDEXED_TOTAL: &str = "connector_sync_documents_indexed_total";
pub const DOCUMENTS_DELETED_TOTAL: &str = "connector_sync_documents_deleted_total";
pub const HEARTBEATS_TOTAL: &str = "connector_heartbeats_total";

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);
static METRICS_DESCRIBED: Once = Once::new();

/// Initialize global tracing exactly once and route `log` records (sqlx, sea-orm) into it.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // Already bridged by a test harness or an earlier call.
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: Failed to install log tracer bridge: {}. sqlx query logs will not be captured.",
                err
            );
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: Failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
    }

    describe_metrics();
    Ok(())
}

/// Register units and help text for the metrics the runner emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRICS_DESCRIBED.call_once(|| {
        describe_histogram!(
            CYCLE_DURATION_MS,
            Unit::Milliseconds,
            "Wall time of one control loop cycle"
        );
        describe_counter!(
            JOBS_CLAIMED_TOTAL,
            Unit::Count,
            "Sync jobs claimed by this worker"
        );
        describe_counter!(
            JOBS_TOTAL,
            Unit::Count,
            "Sync jobs completed, labelled by outcome"
        );
        describe_counter!(
            DOCUMENTS_INDEXED_TOTAL,
            Unit::Count,
            "Documents written to the search index"
        );
        describe_counter!(
            DOCUMENTS_DELETED_TOTAL,
            Unit::Count,
            "Stale documents removed from the search index"
        );
        describe_counter!(
            HEARTBEATS_TOTAL,
            Unit::Count,
            "Connector health checks, labelled by outcome"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        let config = AppConfig {
            log_format: "pretty".to_string(),
            ..AppConfig::default()
        };
        init_tracing(&config).unwrap();
        init_tracing(&config).unwrap();
        describe_metrics();
    }
}
