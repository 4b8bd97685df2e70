//! Cron-like schedule expressions
//!
//! Accepted forms:
//!
//! - five fields: `minute hour day-of-month month day-of-week`
//! - six fields: `second minute hour day-of-month month day-of-week`
//! - macros: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//!   `@midnight`, `@hourly`
//! - fixed intervals: `@every 30s`, `@every 1h30m`
//!
//! Fields take `*`, lists (`1,15`), ranges (`1-5`), steps (`*/10`, `0-30/5`,
//! `5/15`) and month/weekday names. Day-of-week 0 and 7 are both Sunday.
//! When both day fields are restricted a day matches if either one does.
//! All times are UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

/// How far ahead to search before giving up on an expression
const SEARCH_YEARS: i32 = 5;

const MONTH_NAMES: &[(&str, u32)] = &[
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const WEEKDAY_NAMES: &[(&str, u32)] = &[
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("wed", 3),
    ("thu", 4),
    ("fri", 5),
    ("sat", 6),
];

/// A parsed schedule expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expr: String,
    kind: ScheduleKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScheduleKind {
    Cron(CronFields),
    Every(Duration),
}

/// Each field is a bitmask of allowed values
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronFields {
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let kind = if let Some(rest) = trimmed.strip_prefix("@every") {
            ScheduleKind::Every(parse_interval(rest.trim())?)
        } else if trimmed.starts_with('@') {
            let expanded = match trimmed.to_ascii_lowercase().as_str() {
                "@yearly" | "@annually" => "0 0 0 1 1 *",
                "@monthly" => "0 0 0 1 * *",
                "@weekly" => "0 0 0 * * 0",
                "@daily" | "@midnight" => "0 0 0 * * *",
                "@hourly" => "0 0 * * * *",
                _ => return Err(ScheduleError::UnknownMacro(trimmed.to_string())),
            };
            ScheduleKind::Cron(parse_fields(expanded)?)
        } else {
            ScheduleKind::Cron(parse_fields(trimmed)?)
        };

        Ok(Self {
            expr: trimmed.to_string(),
            kind,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`, or `None` if nothing matches
    /// within the search horizon
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            ScheduleKind::Every(interval) => after.checked_add_signed(*interval),
            ScheduleKind::Cron(fields) => fields.next_after(after),
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Next fire time of `expr` strictly after `after`
pub fn next_fire_time(
    expr: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    Ok(Schedule::parse(expr)?.next_after(after))
}

impl CronFields {
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_nanosecond(0)? + Duration::seconds(1);
        let limit_year = start.year() + SEARCH_YEARS;
        let mut t = start;

        loop {
            if t.year() > limit_year {
                return None;
            }
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !bit(self.seconds, t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(Utc.from_utc_datetime(&t));
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_fields(expr: &str) -> Result<CronFields, ScheduleError> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let parts: Vec<&str> = match parts.len() {
        5 => std::iter::once("0").chain(parts).collect(),
        6 => parts,
        n => return Err(ScheduleError::FieldCount(n)),
    };

    let seconds = parse_field(parts[0], 0, 59, &[])?;
    let minutes = parse_field(parts[1], 0, 59, &[])?;
    let hours = parse_field(parts[2], 0, 23, &[])?;
    let days_of_month = parse_field(parts[3], 1, 31, &[])?;
    let months = parse_field(parts[4], 1, 12, MONTH_NAMES)?;
    let mut days_of_week = parse_field(parts[5], 0, 7, WEEKDAY_NAMES)?;

    // 7 is an alias for Sunday
    if bit(days_of_week, 7) {
        days_of_week = (days_of_week & !(1 << 7)) | 1;
    }

    Ok(CronFields {
        seconds,
        minutes,
        hours,
        days_of_month,
        months,
        days_of_week,
        dom_restricted: is_restricted(parts[3]),
        dow_restricted: is_restricted(parts[5]),
    })
}

fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field.starts_with('?'))
}

fn parse_field(field: &str, min: u32, max: u32, names: &[(&str, u32)]) -> Result<u64, ScheduleError> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| ScheduleError::InvalidField(field.to_string()))?;
                if step == 0 {
                    return Err(ScheduleError::InvalidField(field.to_string()));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" || range == "?" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(a, field, names)?,
                parse_value(b, field, names)?,
            )
        } else {
            let value = parse_value(range, field, names)?;
            // `5/15` runs from 5 to the end of the range
            if step.is_some() {
                (value, max)
            } else {
                (value, value)
            }
        };

        if start < min || end > max || start > end {
            return Err(ScheduleError::OutOfRange {
                field: field.to_string(),
                min,
                max,
            });
        }

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            mask |= 1u64 << value;
        }
    }

    Ok(mask)
}

fn parse_value(text: &str, field: &str, names: &[(&str, u32)]) -> Result<u32, ScheduleError> {
    if let Ok(value) = text.parse::<u32>() {
        return Ok(value);
    }
    let lower = text.to_ascii_lowercase();
    names
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, value)| *value)
        .ok_or_else(|| ScheduleError::InvalidField(field.to_string()))
}

/// Parse `1h30m`, `45s`, `2d`
fn parse_interval(text: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidInterval(text.to_string());
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let part = match c {
            's' => Duration::try_seconds(amount),
            'm' => Duration::try_minutes(amount),
            'h' => Duration::try_hours(amount),
            'd' => Duration::try_days(amount),
            _ => return Err(invalid()),
        };
        total = part
            .and_then(|part| total.checked_add(&part))
            .ok_or_else(invalid)?;
    }

    if !digits.is_empty() || total <= Duration::zero() {
        return Err(invalid());
    }
    Ok(total)
}

/// Schedule parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("empty schedule expression")]
    Empty,

    #[error("expected 5 or 6 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid field '{0}'")]
    InvalidField(String),

    #[error("field '{field}' out of range {min}-{max}")]
    OutOfRange { field: String, min: u32, max: u32 },

    #[error("unknown schedule macro '{0}'")]
    UnknownMacro(String),

    #[error("invalid interval '{0}'")]
    InvalidInterval(String),
}
