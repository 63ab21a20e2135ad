//! Connector entity model
//!
//! SeaORM entity for the connectors table. Statuses are stored as their snake_case names and
//! the configuration map as a JSON object keyed by field name.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "connectors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: String,

    /// Search index the connector writes documents into
    pub index_name: String,

    /// Registry key of the pluggable connector implementation
    pub service_type: Option<String>,

    /// Lifecycle status (created, needs_configuration, configured, connected, error)
    pub status: String,

    /// Last sync outcome; null until the first sync starts
    pub sync_status: Option<String>,

    pub scheduling_enabled: bool,

    /// Cron expression driving automatic syncs
    pub scheduling_interval: Option<String>,

    pub sync_now: bool,

    pub last_synced_at: Option<DateTimeWithTimeZone>,

    pub last_seen_at: Option<DateTimeWithTimeZone>,

    pub last_sync_error: Option<String>,

    /// Set if and only if status is error
    pub error: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub configuration: JsonValue,

    pub last_indexed_document_count: i64,

    pub last_deleted_document_count: i64,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJobs,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
