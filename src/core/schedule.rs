//! Cron schedule parsing and next occurrence calculation.
//!
//! Expressions use the seconds-first cron syntax with 6 or 7 fields
//! (`sec min hour day-of-month month day-of-week [year]`). `?` is accepted
//! as "no specific value" in the day fields. Evaluation happens in the
//! scheduler-wide time zone and results are always returned in UTC.

use chrono::{DateTime, Local, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound used to look up the last occurrence of a bounded schedule.
const LAST_SUPPORTED_YEAR: i32 = 2101;

/// Maximum number of missed occurrences counted when a fire is late.
const MAX_MISSED_COUNT: usize = 100;

/// Field positions where `?` is accepted.
const DAY_OF_MONTH: usize = 3;
const DAY_OF_WEEK: usize = 5;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// Time zone applied to every cron evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerTimeZone {
    /// The host's local zone.
    #[default]
    Local,
    /// Coordinated universal time.
    Utc,
    /// A named IANA zone such as `Europe/Berlin`.
    Named(Tz),
}

impl FromStr for SchedulerTimeZone {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Local" | "local" => Ok(Self::Local),
            "Utc" | "UTC" | "utc" => Ok(Self::Utc),
            other => other
                .parse::<Tz>()
                .map(Self::Named)
                .map_err(|_| ScheduleError::InvalidTimezone(other.to_string())),
        }
    }
}

impl fmt::Display for SchedulerTimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "Local"),
            Self::Utc => write!(f, "Utc"),
            Self::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// A parsed cron schedule bound to a time zone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// The expression as supplied by the caller.
    expression: String,
    time_zone: SchedulerTimeZone,
    /// Whether the optional year field limits the schedule.
    bounded: bool,
    schedule: Box<Schedule>,
}

impl CronSchedule {
    /// Parse an expression evaluated in UTC.
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_time_zone(expression, SchedulerTimeZone::Utc)
    }

    /// Parse an expression evaluated in the given time zone.
    pub fn with_time_zone(
        expression: impl Into<String>,
        time_zone: SchedulerTimeZone,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let fields: Vec<&str> = expression.split_whitespace().collect();

        match fields.len() {
            6 | 7 => {}
            n => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 6 or 7 fields, got {}",
                    n
                )));
            }
        }

        // `?` is only meaningful in the day-of-month and day-of-week fields,
        // where it means the same as `*` to the cron crate.
        let mut normalized = Vec::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            match (index, *field) {
                (DAY_OF_MONTH | DAY_OF_WEEK, "?") => normalized.push("*"),
                (_, field) if field.contains('?') => {
                    return Err(ScheduleError::InvalidCron(format!(
                        "{}: '?' is only allowed in the day-of-month and day-of-week fields",
                        expression
                    )));
                }
                (_, field) => normalized.push(field),
            }
        }
        let normalized = normalized.join(" ");

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| ScheduleError::InvalidCron(format!("{}: {}", expression, e)))?;

        let bounded = fields.get(6).is_some_and(|year| year_field_is_bounded(year));

        Ok(Self {
            expression,
            time_zone,
            bounded,
            schedule: Box::new(schedule),
        })
    }

    /// Check an expression without keeping the parsed schedule.
    ///
    /// The day modifiers `L`, `W` and `#` (last day, nearest weekday, nth
    /// weekday of the month) are not supported by the cron crate, so
    /// expressions using them are reported invalid.
    pub fn is_valid(expression: &str) -> bool {
        Self::new(expression).is_ok()
    }

    /// Get the next occurrence strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let next = match self.time_zone {
            SchedulerTimeZone::Local => self.next_in(&after.with_timezone(&Local)),
            SchedulerTimeZone::Utc => self.next_in(&after),
            SchedulerTimeZone::Named(tz) => self.next_in(&after.with_timezone(&tz)),
        };
        next.ok_or(ScheduleError::NoMoreOccurrences)
    }

    fn next_in<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(after)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Last occurrence of the schedule, if the year field bounds it.
    ///
    /// `None` means the schedule recurs indefinitely.
    pub fn final_fire_time(&self) -> Option<DateTime<Utc>> {
        if !self.bounded {
            return None;
        }
        let horizon = Utc
            .with_ymd_and_hms(LAST_SUPPORTED_YEAR, 1, 1, 0, 0, 0)
            .single()?;
        self.schedule
            .after(&horizon)
            .next_back()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Next occurrence after `now` together with how many occurrences in
    /// `(scheduled, now]` were skipped to get there.
    pub fn next_skipping_missed(
        &self,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (Option<DateTime<Utc>>, usize) {
        let mut missed = 0;
        let mut current = scheduled;

        while missed < MAX_MISSED_COUNT {
            match self.next_after(current) {
                Ok(next) if next <= now => {
                    missed += 1;
                    current = next;
                }
                Ok(next) => return (Some(next), missed),
                Err(_) => return (None, missed),
            }
        }

        (self.next_after(now).ok(), missed)
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the time zone the schedule is evaluated in.
    pub fn time_zone(&self) -> SchedulerTimeZone {
        self.time_zone
    }
}

/// A year field is bounded when none of its parts runs open-ended to the
/// last supported year.
fn year_field_is_bounded(field: &str) -> bool {
    field.split(',').all(|part| {
        let base = part.split('/').next().unwrap_or(part);
        base != "*" && base != "?" && (!part.contains('/') || base.contains('-'))
    })
}
