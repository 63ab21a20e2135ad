//! # Connector Sync
//!
//! Keeps a search index in sync with an external data source. A per-connector control loop
//! configures the connector, runs health checks and, on the connector's cron schedule, claims a
//! sync job and reconciles the index against the documents the connector produces.

pub mod config;
pub mod connectors;
pub mod db;
pub mod domain;
pub mod error;
pub mod index;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod reconciler;
pub mod repositories;
pub mod runner;
pub mod schedule;
pub mod telemetry;
pub use migration;
