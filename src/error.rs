//! # Error Handling
//!
//! Store-level errors shared by the repositories and the job ledger, plus helpers for
//! classifying database failures across the supported backends.

use thiserror::Error;

use crate::domain::StateError;

/// Errors surfaced by the connector and sync job repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connector [{connector_id}] not found")]
    ConnectorNotFound { connector_id: String },
    #[error("sync job [{job_id}] not found")]
    JobNotFound { job_id: uuid::Uuid },
    #[error("stored value for {field} is invalid: {value}")]
    InvalidStoredValue { field: &'static str, value: String },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sea_orm::DbErr,
    },
}

impl StoreError {
    pub(crate) fn database(context: &'static str, source: sea_orm::DbErr) -> Self {
        tracing::error!(error = %source, "{context}");
        StoreError::Database { context, source }
    }
}

/// Returns true when `error` is a duplicate key violation on Postgres or SQLite.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    match db_error.code() {
        Some(code) => {
            let code: &str = &code;
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        }
        None => false,
    }
}
