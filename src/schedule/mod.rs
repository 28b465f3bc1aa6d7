//! Recurrence handling: when does a job next become eligible to run.
//!
//! # Components
//!
//! - [`field`]: calendar field sets and the recurrence string parser
//! - [`Periodic`]: cron-like recurrence with odometer carry semantics
//! - [`OneShot`]: fires exactly once, optionally skipping a missed target
//! - [`Schedule::Forever`]: always due
//!
//! Every deadline is truncated to the start of its minute.

pub mod field;
pub mod oneshot;
pub mod periodic;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use field::{CalendarField, FieldSet};
pub use oneshot::{OneShot, OneShotSpec};
pub use periodic::{Periodic, PeriodicSpec};

/// Round `at` down to the start of its minute.
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at)
}

/// Recurrence as written in a job definition. A missing schedule means
/// [`RecurrenceSpec::Forever`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceSpec {
    Periodic(PeriodicSpec),
    Oneshot(OneShotSpec),
    #[default]
    Forever,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Periodic(Periodic),
    OneShot(OneShot),
    Forever,
}

impl Schedule {
    pub fn from_spec(job: &str, spec: &RecurrenceSpec) -> Result<Self> {
        match spec {
            RecurrenceSpec::Periodic(periodic) => Ok(Schedule::Periodic(Periodic::from_spec(periodic)?)),
            RecurrenceSpec::Oneshot(oneshot) => Ok(Schedule::OneShot(OneShot::from_spec(job, oneshot)?)),
            RecurrenceSpec::Forever => Ok(Schedule::Forever),
        }
    }

    /// Next instant at or after `now` when the job becomes eligible, or
    /// `None` when it never will again.
    pub fn get_next_deadline(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Periodic(periodic) => periodic.get_next_deadline(now),
            Schedule::OneShot(oneshot) => oneshot.get_next_deadline(now),
            Schedule::Forever => Some(truncate_to_minute(now)),
        }
    }

    /// Mark the schedule as spent so it never yields another deadline.
    pub(crate) fn exhaust(&mut self) {
        if let Schedule::OneShot(oneshot) = self {
            oneshot.exhaust();
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Periodic(_) => "periodic",
            Schedule::OneShot(_) => "oneshot",
            Schedule::Forever => "forever",
        }
    }
}
