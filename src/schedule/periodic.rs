use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schedule::field::{parse_field, CalendarField, FieldSet, RawField};
use crate::schedule::truncate_to_minute;

/// Years searched before a schedule is declared unsatisfiable (e.g. 30 February).
const SEARCH_HORIZON_YEARS: i32 = 100;

/// Order in which the odometer walks the fields, most significant first.
const WALK: [CalendarField; 4] = [
    CalendarField::Month,
    CalendarField::DayOfMonth,
    CalendarField::Hour,
    CalendarField::Minute,
];

const DAY_OF_MONTH_SLOT: usize = 1;
const MONTH_SLOT: usize = 0;

/// Raw periodic recurrence as it appears in a job definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSpec {
    #[serde(default)]
    pub minute: Option<RawField>,
    #[serde(default)]
    pub hour: Option<RawField>,
    #[serde(default)]
    pub day_of_week: Option<RawField>,
    #[serde(default)]
    pub day_of_month: Option<RawField>,
    #[serde(default)]
    pub month: Option<RawField>,
}

/// A cron-like recurrence over minute, hour, day of week, day of month and month.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Periodic {
    minute: FieldSet,
    hour: FieldSet,
    day_of_week: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
}

/// Candidate instant under construction: a year plus the walked fields.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    year: i32,
    slots: [u32; 4],
}

impl Cursor {
    fn from_instant(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            slots: [at.month(), at.day(), at.hour(), at.minute()],
        }
    }

    fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.slots[0], self.slots[1])
    }
}

impl Periodic {
    pub fn from_spec(spec: &PeriodicSpec) -> Result<Self> {
        Ok(Self {
            minute: parse_field(CalendarField::Minute, spec.minute.as_ref())?,
            hour: parse_field(CalendarField::Hour, spec.hour.as_ref())?,
            day_of_week: parse_field(CalendarField::DayOfWeek, spec.day_of_week.as_ref())?,
            day_of_month: parse_field(CalendarField::DayOfMonth, spec.day_of_month.as_ref())?,
            month: parse_field(CalendarField::Month, spec.month.as_ref())?,
        })
    }

    /// Replace one field with an explicit set of values.
    pub fn with_field(
        mut self,
        field: CalendarField,
        values: impl IntoIterator<Item = u32>,
    ) -> Result<Self> {
        *self.field_mut(field) = FieldSet::explicit(field, values)?;
        Ok(self)
    }

    pub fn field(&self, field: CalendarField) -> &FieldSet {
        match field {
            CalendarField::Minute => &self.minute,
            CalendarField::Hour => &self.hour,
            CalendarField::DayOfWeek => &self.day_of_week,
            CalendarField::DayOfMonth => &self.day_of_month,
            CalendarField::Month => &self.month,
        }
    }

    fn field_mut(&mut self, field: CalendarField) -> &mut FieldSet {
        match field {
            CalendarField::Minute => &mut self.minute,
            CalendarField::Hour => &mut self.hour,
            CalendarField::DayOfWeek => &mut self.day_of_week,
            CalendarField::DayOfMonth => &mut self.day_of_month,
            CalendarField::Month => &mut self.month,
        }
    }

    /// Earliest instant at or after `now` (truncated to the minute) matching
    /// every field. Returns `now` truncated when it already matches, and
    /// `None` when no match exists within the search horizon.
    pub fn get_next_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let now = truncate_to_minute(now);
        let horizon = now.year().saturating_add(SEARCH_HORIZON_YEARS);
        let mut cursor = Cursor::from_instant(now);

        loop {
            if cursor.year > horizon {
                return None;
            }

            if let Some(slot) =
                (0..WALK.len()).find(|&slot| !self.field(WALK[slot]).contains(cursor.slots[slot]))
            {
                self.increment(&mut cursor, slot);
                continue;
            }

            // 31 April and friends: roll into the next allowed month.
            let Some(date) = cursor.date() else {
                self.increment(&mut cursor, MONTH_SLOT);
                continue;
            };

            let weekday = date.weekday().num_days_from_monday();
            if !self.day_of_week.contains(weekday) {
                self.increment(&mut cursor, DAY_OF_MONTH_SLOT);
                continue;
            }

            let naive = date.and_hms_opt(cursor.slots[2], cursor.slots[3], 0)?;
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    /// Bump `slot` to its next allowed value, resetting every less significant
    /// slot to its minimum and carrying into more significant slots (and
    /// finally the year) on wraparound.
    fn increment(&self, cursor: &mut Cursor, slot: usize) {
        for later in slot + 1..WALK.len() {
            cursor.slots[later] = self.field(WALK[later]).first(WALK[later]);
        }

        for current in (0..=slot).rev() {
            let field = WALK[current];
            let set = self.field(field);
            match set.next_after(cursor.slots[current], field) {
                Some(next) => {
                    cursor.slots[current] = next;
                    return;
                }
                None => cursor.slots[current] = set.first(field),
            }
        }

        cursor.year += 1;
    }
}
