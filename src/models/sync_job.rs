//! SyncJob entity model
//!
//! SeaORM entity for the sync_jobs table. One row per sync attempt; a partial unique index
//! keeps at most one `in_progress` row per connector.

use super::connector::Entity as Connector;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub connector_id: String,

    /// in_progress, completed or error
    pub status: String,

    pub indexed_document_count: i64,

    pub deleted_document_count: i64,

    /// Failure message, only set when status is error
    pub error: Option<String>,

    /// Host that claimed the job
    pub worker_hostname: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    /// Null while the job is running
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Connector",
        from = "Column::ConnectorId",
        to = "super::connector::Column::Id"
    )]
    Connector,
}

impl Related<Connector> for Entity {
    fn to() -> RelationDef {
        Relation::Connector.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
