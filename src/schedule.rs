//! Cron expression evaluation for connector sync schedules.
//!
//! Connector schedules use Quartz-style expressions: six fields with leading seconds, an
//! optional trailing year, and `?` as "no specific value" in the day fields. Classic
//! five-field expressions are accepted too and fire at second zero.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

/// Errors produced while evaluating a schedule expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },
    #[error("cron expression '{expression}' has no trigger after {after}")]
    NoUpcomingTrigger {
        expression: String,
        after: DateTime<Utc>,
    },
}

/// Parses `expression` into a schedule, normalizing five-field and Quartz forms.
pub fn parse(expression: &str) -> Result<Schedule, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    let normalized = match fields.len() {
        5 => format!("0 {}", normalize_fields(&fields)),
        6 | 7 => normalize_fields(&fields),
        count => {
            return Err(ScheduleError::Invalid {
                expression: expression.to_string(),
                reason: format!("expected 5, 6 or 7 fields, found {count}"),
            });
        }
    };

    Schedule::from_str(&normalized).map_err(|e| ScheduleError::Invalid {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Returns the first trigger time strictly after `after`.
pub fn next_trigger(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    parse(expression)?
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleError::NoUpcomingTrigger {
            expression: expression.to_string(),
            after,
        })
}

// `?` only means "unconstrained" in the day fields.
fn normalize_fields(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| if *field == "?" { "*" } else { *field })
        .collect::<Vec<_>>()
        .join(" ")
}
