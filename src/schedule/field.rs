//! Calendar field constraints and the parser that produces them.
//!
//! A field is either unconstrained (every value in its domain is allowed) or
//! an explicit, strictly ascending set of values inside the domain. Raw values
//! come from job definitions and may be integers, range strings such as
//! `"1-5"`, step strings such as `"/15"` or `"8-18/2"`, comma separated
//! combinations of those, or lists mixing integers and strings.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// The five calendar fields a periodic schedule constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarField {
    Minute,
    Hour,
    /// 0 is Monday, 6 is Sunday.
    DayOfWeek,
    DayOfMonth,
    Month,
}

impl CalendarField {
    /// Inclusive domain of the field.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            CalendarField::Minute => (0, 59),
            CalendarField::Hour => (0, 23),
            CalendarField::DayOfWeek => (0, 6),
            CalendarField::DayOfMonth => (1, 31),
            CalendarField::Month => (1, 12),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CalendarField::Minute => "minute",
            CalendarField::Hour => "hour",
            CalendarField::DayOfWeek => "day_of_week",
            CalendarField::DayOfMonth => "day_of_month",
            CalendarField::Month => "month",
        }
    }
}

impl std::fmt::Display for CalendarField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Allowed values for one calendar field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldSet {
    #[default]
    Unconstrained,
    /// Strictly ascending, non-empty, inside the field's domain.
    Explicit(Vec<u32>),
}

impl FieldSet {
    /// Build an explicit set, sorting and deduplicating `values`.
    pub fn explicit(field: CalendarField, values: impl IntoIterator<Item = u32>) -> Result<Self> {
        let (lo, hi) = field.bounds();
        let set: BTreeSet<u32> = values.into_iter().collect();

        if set.is_empty() {
            return Err(SchedulerError::recurrence(field.name(), "no values allowed"));
        }
        if let Some(bad) = set.iter().find(|v| **v < lo || **v > hi) {
            return Err(SchedulerError::recurrence(
                field.name(),
                format!("{} outside {}-{}", bad, lo, hi),
            ));
        }

        Ok(FieldSet::Explicit(set.into_iter().collect()))
    }

    pub fn contains(&self, value: u32) -> bool {
        match self {
            FieldSet::Unconstrained => true,
            FieldSet::Explicit(values) => values.binary_search(&value).is_ok(),
        }
    }

    /// Smallest allowed value. A hand-built empty set falls back to the
    /// domain minimum, which it never contains.
    pub fn first(&self, field: CalendarField) -> u32 {
        let (lo, _) = field.bounds();
        match self {
            FieldSet::Unconstrained => lo,
            FieldSet::Explicit(values) => values.first().copied().unwrap_or(lo),
        }
    }

    /// Smallest allowed value strictly greater than `value`, or `None` when the
    /// field has to wrap around.
    pub fn next_after(&self, value: u32, field: CalendarField) -> Option<u32> {
        match self {
            FieldSet::Unconstrained => {
                let (_, hi) = field.bounds();
                (value < hi).then_some(value + 1)
            }
            FieldSet::Explicit(values) => values.iter().copied().find(|v| *v > value),
        }
    }
}

/// A field value as written in a job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Int(i64),
    Text(String),
    List(Vec<RawItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawItem {
    Int(i64),
    Text(String),
}

/// Parse an optional raw value into a [`FieldSet`]. `None` means every value.
pub fn parse_field(field: CalendarField, raw: Option<&RawField>) -> Result<FieldSet> {
    let Some(raw) = raw else {
        return Ok(FieldSet::Unconstrained);
    };

    let mut values = BTreeSet::new();
    match raw {
        RawField::Int(n) => {
            values.insert(literal(field, *n)?);
        }
        RawField::Text(text) => parse_text(field, text, &mut values)?,
        RawField::List(items) => {
            for item in items {
                match item {
                    RawItem::Int(n) => {
                        values.insert(literal(field, *n)?);
                    }
                    RawItem::Text(text) => parse_text(field, text, &mut values)?,
                }
            }
        }
    }

    FieldSet::explicit(field, values)
}

fn literal(field: CalendarField, n: i64) -> Result<u32> {
    let (lo, hi) = field.bounds();
    u32::try_from(n)
        .ok()
        .filter(|v| *v >= lo && *v <= hi)
        .ok_or_else(|| SchedulerError::recurrence(field.name(), format!("{} outside {}-{}", n, lo, hi)))
}

fn number(field: CalendarField, text: &str) -> Result<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| SchedulerError::recurrence(field.name(), format!("{:?} is not a number", text)))
}

fn parse_text(field: CalendarField, text: &str, out: &mut BTreeSet<u32>) -> Result<()> {
    for component in text.split(',') {
        parse_component(field, component.trim(), out)?;
    }
    Ok(())
}

fn parse_component(field: CalendarField, component: &str, out: &mut BTreeSet<u32>) -> Result<()> {
    let (lo, hi) = field.bounds();

    if component.is_empty() {
        return Err(SchedulerError::recurrence(field.name(), "empty component"));
    }

    let mut parts = component.split('/');
    let bound = parts.next().unwrap_or_default().trim();
    let step = match parts.next() {
        Some(step) => number(field, step)?,
        None => 1,
    };
    if parts.next().is_some() {
        return Err(SchedulerError::recurrence(
            field.name(),
            format!("{:?} has more than one step", component),
        ));
    }
    if step < 1 {
        return Err(SchedulerError::recurrence(
            field.name(),
            format!("step in {:?} must be positive", component),
        ));
    }
    let stepped = component.contains('/');

    let (start, end) = if bound.is_empty() {
        // "/K"
        (lo, hi)
    } else if let Some(end) = bound.strip_prefix('-') {
        (lo, literal(field, number(field, end)?)?)
    } else if let Some(start) = bound.strip_suffix('-') {
        (literal(field, number(field, start)?)?, hi)
    } else if let Some((start, end)) = bound.split_once('-') {
        (
            literal(field, number(field, start)?)?,
            literal(field, number(field, end)?)?,
        )
    } else {
        let value = literal(field, number(field, bound)?)?;
        if stepped {
            (value, hi)
        } else {
            (value, value)
        }
    };

    if start > end {
        return Err(SchedulerError::recurrence(
            field.name(),
            format!("range {:?} is reversed", component),
        ));
    }

    out.extend((start..=end).step_by(step as usize));
    Ok(())
}
