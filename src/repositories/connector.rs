//! Connector repository for database operations
//!
//! Maps between the `connectors` table and [`ConnectorState`]. Every mutation reads the
//! current record and applies a domain mutator, so the state invariants live in one place.
//! Only the columns the mutator owns are written back; an operator edit to `sync_now` or the
//! schedule landing between the read and the write survives.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    IdenStatic, Iterable, NotSet, QueryFilter, Set,
};
use serde_json::{Map, Value as JsonValue, json};

use crate::domain::{
    ConfigurableField, ConfigurationItem, ConnectorState, ConnectorStatus, Scheduling, SyncStatus,
};
use crate::error::StoreError;
use crate::models::connector::{self, Column, Entity as Connector};

/// Columns written by [`ConnectorState::set_status`].
const STATUS_COLUMNS: &[Column] = &[Column::Status, Column::Error];

/// Columns written by [`ConnectorState::record_heartbeat`].
const HEARTBEAT_COLUMNS: &[Column] = &[Column::Status, Column::Error, Column::LastSeenAt];

/// Columns written by [`ConnectorState::apply_configurable_fields`].
const CONFIGURATION_COLUMNS: &[Column] = &[
    Column::Configuration,
    Column::Status,
    Column::Error,
    Column::LastSeenAt,
];

/// Columns written by [`ConnectorState::mark_sync_started`].
pub(crate) const SYNC_STARTED_COLUMNS: &[Column] =
    &[Column::SyncStatus, Column::SyncNow, Column::LastSyncedAt];

/// Columns written by [`ConnectorState::mark_sync_completed`].
pub(crate) const SYNC_COMPLETED_COLUMNS: &[Column] = &[
    Column::SyncStatus,
    Column::LastSyncError,
    Column::LastIndexedDocumentCount,
    Column::LastDeletedDocumentCount,
    Column::Status,
    Column::Error,
];

/// Repository for connector records
#[derive(Debug, Clone)]
pub struct ConnectorRepository {
    db: Arc<DatabaseConnection>,
}

impl ConnectorRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Loads a connector, returning `None` when no record exists.
    pub async fn get(&self, connector_id: &str) -> Result<Option<ConnectorState>, StoreError> {
        find_connector(&*self.db, connector_id).await
    }

    /// Inserts a new connector record.
    pub async fn create(&self, state: &ConnectorState) -> Result<ConnectorState, StoreError> {
        let now = Utc::now();
        let mut active = to_active_model(state, now);
        active.created_at = Set(now.fixed_offset());

        let model = active
            .insert(&*self.db)
            .await
            .map_err(|e| StoreError::database("failed to create connector", e))?;

        tracing::info!(connector_id = %model.id, index_name = %model.index_name, "Connector created");
        to_state(model)
    }

    /// Overwrites the stored record with `state`.
    pub async fn save(&self, state: &ConnectorState) -> Result<(), StoreError> {
        write_connector(&*self.db, state).await
    }

    pub async fn update_status(
        &self,
        connector_id: &str,
        status: ConnectorStatus,
        error: Option<String>,
    ) -> Result<ConnectorState, StoreError> {
        let mut state = self.require(connector_id).await?;
        state.set_status(status, error)?;
        write_connector_columns(&*self.db, &state, STATUS_COLUMNS).await?;
        Ok(state)
    }

    /// Records a health check outcome and refreshes `last_seen_at`.
    pub async fn heartbeat(
        &self,
        connector_id: &str,
        error: Option<String>,
    ) -> Result<ConnectorState, StoreError> {
        let mut state = self.require(connector_id).await?;
        state.record_heartbeat(error, Utc::now());
        write_connector_columns(&*self.db, &state, HEARTBEAT_COLUMNS).await?;
        Ok(state)
    }

    /// Persists the connector's declared configuration fields.
    pub async fn update_configuration(
        &self,
        connector_id: &str,
        fields: &[ConfigurableField],
    ) -> Result<ConnectorState, StoreError> {
        let mut state = self.require(connector_id).await?;
        state.apply_configurable_fields(fields, Utc::now());
        write_connector_columns(&*self.db, &state, CONFIGURATION_COLUMNS).await?;

        tracing::info!(
            connector_id,
            status = %state.status(),
            fields = fields.len(),
            "Connector configuration updated"
        );
        Ok(state)
    }

    pub async fn update_service_type(
        &self,
        connector_id: &str,
        service_type: &str,
    ) -> Result<ConnectorState, StoreError> {
        let mut state = self.require(connector_id).await?;
        state.service_type = Some(service_type.to_string());
        write_connector_columns(&*self.db, &state, &[Column::ServiceType]).await?;
        Ok(state)
    }

    async fn require(&self, connector_id: &str) -> Result<ConnectorState, StoreError> {
        self.get(connector_id)
            .await?
            .ok_or_else(|| StoreError::ConnectorNotFound {
                connector_id: connector_id.to_string(),
            })
    }
}

pub(crate) async fn find_connector<C: ConnectionTrait>(
    conn: &C,
    connector_id: &str,
) -> Result<Option<ConnectorState>, StoreError> {
    Connector::find_by_id(connector_id.to_string())
        .one(conn)
        .await
        .map_err(|e| StoreError::database("failed to load connector", e))?
        .map(to_state)
        .transpose()
}

pub(crate) async fn write_connector<C: ConnectionTrait>(
    conn: &C,
    state: &ConnectorState,
) -> Result<(), StoreError> {
    update_connector(conn, to_active_model(state, Utc::now()), &state.id).await
}

/// Writes `columns` of `state` and `updated_at`, leaving every other column as stored.
pub(crate) async fn write_connector_columns<C: ConnectionTrait>(
    conn: &C,
    state: &ConnectorState,
    columns: &[Column],
) -> Result<(), StoreError> {
    let mut active = to_active_model(state, Utc::now());
    for column in Column::iter() {
        let written = matches!(column, Column::Id | Column::UpdatedAt)
            || columns.iter().any(|c| c.as_str() == column.as_str());
        if !written {
            active.not_set(column);
        }
    }
    update_connector(conn, active, &state.id).await
}

/// Bumps `updated_at`. Inside a transaction this takes the row's write lock before anything
/// else is read, which serializes claims for the same connector on every backend.
pub(crate) async fn lock_connector<C: ConnectionTrait>(
    conn: &C,
    connector_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = Connector::update_many()
        .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
        .filter(Column::Id.eq(connector_id))
        .exec(conn)
        .await
        .map_err(|e| StoreError::database("failed to lock connector", e))?;

    if result.rows_affected == 0 {
        return Err(StoreError::ConnectorNotFound {
            connector_id: connector_id.to_string(),
        });
    }
    Ok(())
}

async fn update_connector<C: ConnectionTrait>(
    conn: &C,
    active: connector::ActiveModel,
    connector_id: &str,
) -> Result<(), StoreError> {
    match active.update(conn).await {
        Ok(_) => Ok(()),
        Err(DbErr::RecordNotUpdated) => Err(StoreError::ConnectorNotFound {
            connector_id: connector_id.to_string(),
        }),
        Err(e) => Err(StoreError::database("failed to save connector", e)),
    }
}

fn to_active_model(state: &ConnectorState, now: DateTime<Utc>) -> connector::ActiveModel {
    let scheduling = state.scheduling.as_ref();
    connector::ActiveModel {
        id: Set(state.id.clone()),
        name: Set(state.name.clone()),
        index_name: Set(state.index_name.clone()),
        service_type: Set(state.service_type.clone()),
        status: Set(state.status().as_str().to_string()),
        sync_status: Set(state.sync_status.map(|s| s.as_str().to_string())),
        scheduling_enabled: Set(scheduling.is_some_and(|s| s.enabled)),
        scheduling_interval: Set(scheduling.map(|s| s.interval.clone())),
        sync_now: Set(state.sync_now),
        last_synced_at: Set(state.last_synced_at.map(|t| t.fixed_offset())),
        last_seen_at: Set(state.last_seen_at.map(|t| t.fixed_offset())),
        last_sync_error: Set(state.last_sync_error.clone()),
        error: Set(state.error().map(str::to_string)),
        configuration: Set(configuration_to_json(&state.configuration)),
        last_indexed_document_count: Set(to_db_count(state.last_indexed_document_count)),
        last_deleted_document_count: Set(to_db_count(state.last_deleted_document_count)),
        created_at: NotSet,
        updated_at: Set(now.fixed_offset()),
    }
}

fn to_state(model: connector::Model) -> Result<ConnectorState, StoreError> {
    let status: ConnectorStatus = model.status.parse()?;
    let sync_status = model
        .sync_status
        .as_deref()
        .map(str::parse::<SyncStatus>)
        .transpose()?;
    let configuration = configuration_from_json(model.configuration)?;

    let scheduling = model.scheduling_interval.map(|interval| Scheduling {
        enabled: model.scheduling_enabled,
        interval,
    });

    let mut state = ConnectorState::new(model.id, model.name, model.index_name);
    state.service_type = model.service_type;
    state.set_status(status, model.error)?;
    state.sync_status = sync_status;
    state.scheduling = scheduling;
    state.sync_now = model.sync_now;
    state.last_synced_at = model.last_synced_at.map(from_db_time);
    state.last_seen_at = model.last_seen_at.map(from_db_time);
    state.last_sync_error = model.last_sync_error;
    state.configuration = configuration;
    state.last_indexed_document_count = from_db_count(model.last_indexed_document_count);
    state.last_deleted_document_count = from_db_count(model.last_deleted_document_count);
    Ok(state)
}

fn configuration_to_json(configuration: &BTreeMap<String, ConfigurationItem>) -> JsonValue {
    let entries: Map<String, JsonValue> = configuration
        .iter()
        .map(|(name, item)| {
            (
                name.clone(),
                json!({ "label": item.label, "value": item.value }),
            )
        })
        .collect();
    JsonValue::Object(entries)
}

fn configuration_from_json(
    value: JsonValue,
) -> Result<BTreeMap<String, ConfigurationItem>, StoreError> {
    if value.is_null() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_value(value.clone()).map_err(|_| StoreError::InvalidStoredValue {
        field: "configuration",
        value: value.to_string(),
    })
}

pub(crate) fn from_db_time(value: DateTimeWithTimeZone) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

pub(crate) fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectOptions, Database};

    const HOURLY: &str = "0 0 * * * ?";

    async fn repository() -> ConnectorRepository {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        ConnectorRepository::new(Arc::new(db))
    }

    async fn connected(repo: &ConnectorRepository) -> ConnectorState {
        let mut state = ConnectorState::new("conn-1", "Connector", "search-conn-1");
        state.set_status(ConnectorStatus::Connected, None).unwrap();
        repo.create(&state).await.unwrap()
    }

    /// An operator requests a sync and reschedules after `snapshot` was read.
    async fn operator_edit(repo: &ConnectorRepository, snapshot: &ConnectorState) {
        let mut edited = snapshot.clone();
        edited.sync_now = true;
        edited.scheduling = Some(Scheduling {
            enabled: true,
            interval: HOURLY.to_string(),
        });
        repo.save(&edited).await.unwrap();
    }

    #[tokio::test]
    async fn status_write_keeps_operator_edits_made_after_the_read() {
        let repo = repository().await;
        let mut snapshot = connected(&repo).await;
        operator_edit(&repo, &snapshot).await;

        snapshot
            .set_status(ConnectorStatus::Error, Some("bad credentials".into()))
            .unwrap();
        write_connector_columns(&*repo.db, &snapshot, STATUS_COLUMNS)
            .await
            .unwrap();

        let stored = repo.get("conn-1").await.unwrap().unwrap();
        assert_eq!(stored.status(), ConnectorStatus::Error);
        assert_eq!(stored.error(), Some("bad credentials"));
        assert!(stored.sync_now);
        assert_eq!(
            stored.scheduling.map(|s| s.interval).as_deref(),
            Some(HOURLY)
        );
    }

    #[tokio::test]
    async fn heartbeat_write_keeps_operator_edits_made_after_the_read() {
        let repo = repository().await;
        let mut snapshot = connected(&repo).await;
        operator_edit(&repo, &snapshot).await;

        let seen = Utc::now();
        snapshot.record_heartbeat(None, seen);
        write_connector_columns(&*repo.db, &snapshot, HEARTBEAT_COLUMNS)
            .await
            .unwrap();

        let stored = repo.get("conn-1").await.unwrap().unwrap();
        assert!(stored.last_seen_at.is_some());
        assert!(stored.sync_now);
        assert!(stored.scheduling.is_some_and(|s| s.enabled));
    }

    #[tokio::test]
    async fn column_write_of_unknown_connector_fails() {
        let repo = repository().await;
        let state = ConnectorState::new("ghost", "Ghost", "search-ghost");

        let err = write_connector_columns(&*repo.db, &state, STATUS_COLUMNS)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConnectorNotFound { connector_id } if connector_id == "ghost"));
    }
}
