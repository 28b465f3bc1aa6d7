use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::schedule::truncate_to_minute;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneShotSpec {
    /// RFC 3339, or `YYYY-MM-DD HH:MM[:SS]` read as UTC.
    pub at: String,
    #[serde(default)]
    pub cancel_if_missed: bool,
}

/// A schedule that fires exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShot {
    target: DateTime<Utc>,
    cancel_if_missed: bool,
    fired: bool,
}

impl OneShot {
    pub fn new(target: DateTime<Utc>, cancel_if_missed: bool) -> Self {
        Self {
            target,
            cancel_if_missed,
            fired: false,
        }
    }

    pub fn from_spec(job: &str, spec: &OneShotSpec) -> Result<Self> {
        let target = parse_instant(&spec.at).ok_or_else(|| SchedulerError::InvalidDefinition {
            name: job.to_string(),
            reason: format!("cannot parse one-shot instant {:?}", spec.at),
        })?;
        Ok(Self::new(target, spec.cancel_if_missed))
    }

    pub fn target(&self) -> DateTime<Utc> {
        self.target
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub(crate) fn exhaust(&mut self) {
        self.fired = true;
    }

    /// Returns the single firing instant the first time it is asked, `None`
    /// afterwards. A missed target is made up at `now` unless
    /// `cancel_if_missed` is set, in which case the run is skipped.
    ///
    /// `now` is compared with the target at full precision. A future target
    /// inside a minute is rounded up so the job never fires before it.
    pub fn get_next_deadline(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.fired {
            return None;
        }

        self.fired = true;
        if now > self.target && self.cancel_if_missed {
            return None;
        }

        if now >= self.target {
            Some(truncate_to_minute(now))
        } else {
            Some(round_up_to_minute(self.target))
        }
    }
}

fn round_up_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    let floor = truncate_to_minute(at);
    if floor == at {
        floor
    } else {
        floor + TimeDelta::minutes(1)
    }
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}
