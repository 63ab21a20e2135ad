//! # Data Models
//!
//! SeaORM entities backing the connector store.

pub mod connector;
pub mod sync_job;

pub use connector::Entity as Connector;
pub use sync_job::Entity as SyncJob;
