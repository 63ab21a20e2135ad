//! Connector state and the predicates the control loop evaluates on each cycle.
//!
//! Every predicate is pure over a snapshot of the record; time is passed in explicitly so
//! callers (and tests) decide what "now" is.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{StateError, SyncCompletion, SyncStatus};
use crate::schedule::{self, ScheduleError};

/// How far back the first scheduled sync looks when a connector has never synced.
const NEVER_SYNCED_LOOKBACK_HOURS: i64 = 24;

/// Lifecycle status of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Created,
    NeedsConfiguration,
    Configured,
    Connected,
    Error,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Created => "created",
            ConnectorStatus::NeedsConfiguration => "needs_configuration",
            ConnectorStatus::Configured => "configured",
            ConnectorStatus::Connected => "connected",
            ConnectorStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorStatus {
    type Err = StateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(ConnectorStatus::Created),
            "needs_configuration" => Ok(ConnectorStatus::NeedsConfiguration),
            "configured" => Ok(ConnectorStatus::Configured),
            "connected" => Ok(ConnectorStatus::Connected),
            "error" => Ok(ConnectorStatus::Error),
            other => Err(StateError::UnknownStatus {
                kind: "connector status",
                value: other.to_string(),
            }),
        }
    }
}

/// Automatic sync schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduling {
    pub enabled: bool,
    /// Cron expression, see [`crate::schedule`].
    pub interval: String,
}

/// A persisted configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationItem {
    pub label: String,
    pub value: Option<String>,
}

/// A configuration field a connector declares it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurableField {
    pub label: String,
    pub name: String,
    pub default_value: Option<String>,
}

impl ConfigurableField {
    pub fn new(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Snapshot of one connector record.
///
/// `status` and `error` are only reachable through [`ConnectorState::set_status`] and the
/// other mutators so that an `error` status always carries a message and any other status
/// never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorState {
    pub id: String,
    pub name: String,
    pub index_name: String,
    pub service_type: Option<String>,
    status: ConnectorStatus,
    error: Option<String>,
    /// `None` until the first sync starts.
    pub sync_status: Option<SyncStatus>,
    pub scheduling: Option<Scheduling>,
    pub sync_now: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub configuration: BTreeMap<String, ConfigurationItem>,
    pub last_indexed_document_count: u64,
    pub last_deleted_document_count: u64,
}

impl ConnectorState {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            index_name: index_name.into(),
            service_type: None,
            status: ConnectorStatus::Created,
            error: None,
            sync_status: None,
            scheduling: None,
            sync_now: false,
            last_synced_at: None,
            last_seen_at: None,
            last_sync_error: None,
            configuration: BTreeMap::new(),
            last_indexed_document_count: 0,
            last_deleted_document_count: 0,
        }
    }

    pub fn status(&self) -> ConnectorStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn should_configure(&self) -> bool {
        self.status == ConnectorStatus::Created
    }

    pub fn status_allows_sync(&self) -> bool {
        matches!(
            self.status,
            ConnectorStatus::Error | ConnectorStatus::Connected | ConnectorStatus::Configured
        )
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.scheduling.as_ref().is_some_and(|s| s.enabled)
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_status == Some(SyncStatus::InProgress)
    }

    pub fn last_sync_failed(&self) -> bool {
        self.sync_status == Some(SyncStatus::Error)
    }

    /// Whether a sync should start at `now`.
    ///
    /// A running sync or a disabled schedule always wins. Otherwise `sync_now` and a failed
    /// previous sync force a run; failing that, the schedule decides by comparing its next
    /// trigger after the last sync (or a day ago, if never synced) with `now`.
    pub fn should_sync(&self, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
        if self.is_syncing() || !self.is_sync_enabled() {
            return Ok(false);
        }
        if self.sync_now || self.last_sync_failed() {
            return Ok(true);
        }

        let Some(scheduling) = self.scheduling.as_ref() else {
            return Ok(false);
        };
        let since = self
            .last_synced_at
            .unwrap_or_else(|| now - Duration::hours(NEVER_SYNCED_LOOKBACK_HOURS));

        Ok(schedule::next_trigger(&scheduling.interval, since)? < now)
    }

    pub fn should_heartbeat(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        if !self.status_allows_sync() {
            return false;
        }
        match self.last_seen_at {
            None => true,
            // An interval past the representable range is never due.
            Some(last_seen) => last_seen
                .checked_add_signed(interval)
                .is_some_and(|due| due < now),
        }
    }

    /// Sets the lifecycle status. `error` is required for [`ConnectorStatus::Error`] and
    /// discarded for every other status.
    pub fn set_status(
        &mut self,
        status: ConnectorStatus,
        error: Option<String>,
    ) -> Result<(), StateError> {
        if status == ConnectorStatus::Error {
            match error.filter(|msg| !msg.trim().is_empty()) {
                Some(msg) => self.error = Some(msg),
                None => {
                    return Err(StateError::MissingErrorMessage {
                        connector_id: self.id.clone(),
                    });
                }
            }
        } else {
            self.error = None;
        }
        self.status = status;
        Ok(())
    }

    /// Records a health check result. The lifecycle status only moves when the current status
    /// already allows syncing.
    pub fn record_heartbeat(&mut self, error: Option<String>, now: DateTime<Utc>) {
        self.last_seen_at = Some(now);
        if !self.status_allows_sync() {
            return;
        }
        match error.filter(|msg| !msg.trim().is_empty()) {
            Some(msg) => {
                self.status = ConnectorStatus::Error;
                self.error = Some(msg);
            }
            None => {
                self.status = ConnectorStatus::Connected;
                self.error = None;
            }
        }
    }

    /// Replaces the configuration with the connector's declared fields.
    ///
    /// Any field without a default leaves the connector in `needs_configuration`.
    pub fn apply_configurable_fields(&mut self, fields: &[ConfigurableField], now: DateTime<Utc>) {
        self.configuration = fields
            .iter()
            .map(|field| {
                (
                    field.name.clone(),
                    ConfigurationItem {
                        label: field.label.clone(),
                        value: field.default_value.clone(),
                    },
                )
            })
            .collect();

        self.status = if fields.iter().any(|f| f.default_value.is_none()) {
            ConnectorStatus::NeedsConfiguration
        } else {
            ConnectorStatus::Configured
        };
        self.error = None;
        self.last_seen_at = Some(now);
    }

    pub fn mark_sync_started(&mut self, now: DateTime<Utc>) {
        self.sync_status = Some(SyncStatus::InProgress);
        self.sync_now = false;
        self.last_synced_at = Some(now);
    }

    pub fn mark_sync_completed(&mut self, completion: &SyncCompletion) {
        self.sync_status = Some(completion.status());
        self.last_sync_error = completion.error.clone();
        self.last_indexed_document_count = completion.indexed;
        self.last_deleted_document_count = completion.deleted;
        match &completion.error {
            Some(msg) => {
                self.status = ConnectorStatus::Error;
                self.error = Some(msg.clone());
            }
            None => {
                self.status = ConnectorStatus::Connected;
                self.error = None;
            }
        }
    }

    /// Value of a configuration entry, if set.
    pub fn config_value(&self, name: &str) -> Option<&str> {
        self.configuration
            .get(name)
            .and_then(|item| item.value.as_deref())
    }
}
