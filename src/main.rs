//! # Connector Sync Entry Point
//!
//! Runs the control loop for a single connector until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use connector_sync::{
    config::ConfigLoader, connectors::Registry, db, runner::Runner, telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "connector-sync", version, about = "Sync a connector's documents into a search index")]
struct Cli {
    /// Connector record to drive
    #[arg(long, env = "CONNECTOR_SYNC_CONNECTOR_ID")]
    connector_id: Option<String>,

    /// Service type assigned to a connector that has none
    #[arg(long, env = "CONNECTOR_SYNC_CONNECTOR_SERVICE_TYPE")]
    service_type: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    if cli.connector_id.is_some() {
        config.connector_id = cli.connector_id;
    }
    if cli.service_type.is_some() {
        config.connector_service_type = cli.service_type;
    }

    telemetry::init_tracing(&config).context("initializing tracing")?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::connect_and_migrate(&config)
        .await
        .context("connecting to database")?;

    let runner = Runner::start(&config, db, Registry::with_builtin_connectors())
        .await
        .context("starting connector runner")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Received Ctrl-C, shutting down");
        signal_token.cancel();
    });

    runner
        .run_until(shutdown)
        .await
        .context("stopping connector runner")?;
    Ok(())
}
