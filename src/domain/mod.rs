//! Domain types shared by the ledger, the reconciler and the orchestrator.

pub mod connector;
pub mod document;
pub mod sync_job;

pub use connector::{
    ConfigurableField, ConfigurationItem, ConnectorState, ConnectorStatus, Scheduling,
};
pub use document::Document;
pub use sync_job::{SyncCompletion, SyncJob, SyncStatus};

use thiserror::Error;

/// Violations of the connector state invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("an error message is required when setting connector [{connector_id}] to error")]
    MissingErrorMessage { connector_id: String },
    #[error("unknown {kind} '{value}'")]
    UnknownStatus { kind: &'static str, value: String },
}
