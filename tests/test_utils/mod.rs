//! Test utilities for database testing.
//!
//! Sets up in-memory SQLite databases with migrations applied and seeds connector records.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use connector_sync::domain::{ConnectorState, Scheduling};
use connector_sync::repositories::ConnectorRepository;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

/// Every minute, at second zero.
pub const EVERY_MINUTE: &str = "0 * * * * ?";

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool holds a single connection, so concurrent transactions queue behind each other
/// instead of failing with `SQLITE_LOCKED`.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Sets up an in-memory SQLite database with all migrations applied and returns an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(db))
}

/// A fresh connector record in `created` status.
pub fn connector_state(id: &str, service_type: Option<&str>) -> ConnectorState {
    let mut state = ConnectorState::new(id, format!("Connector {id}"), format!("search-{id}"));
    state.service_type = service_type.map(str::to_string);
    state
}

/// Inserts a connector with an enabled schedule.
pub async fn seed_connector(
    db: &Arc<DatabaseConnection>,
    id: &str,
    service_type: Option<&str>,
    interval: &str,
) -> Result<ConnectorState> {
    let mut state = connector_state(id, service_type);
    state.scheduling = Some(Scheduling {
        enabled: true,
        interval: interval.to_string(),
    });
    let repo = ConnectorRepository::new(db.clone());
    Ok(repo.create(&state).await?)
}
