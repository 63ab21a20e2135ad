//! # Repository Layer
//!
//! Repositories encapsulate the SeaORM operations for connector records and sync jobs and
//! translate rows into the domain types.

pub mod connector;
pub mod sync_job;

pub use connector::ConnectorRepository;
pub use sync_job::SyncJobRepository;
