//! Job triggers: fixed intervals and five-field crontab expressions
//!
//! All times are UTC. Fire-time computation is pure so the scheduler can be
//! driven with any clock.

use chrono::{DateTime, Datelike, TimeDelta, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::JobError;

/// Unit of an interval trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl IntervalUnit {
    /// `value` units as a time delta, `None` on overflow
    pub fn delta(self, value: u32) -> Option<TimeDelta> {
        let value = i64::from(value);
        match self {
            IntervalUnit::Seconds => TimeDelta::try_seconds(value),
            IntervalUnit::Minutes => TimeDelta::try_minutes(value),
            IntervalUnit::Hours => TimeDelta::try_hours(value),
            IntervalUnit::Days => TimeDelta::try_days(value),
            IntervalUnit::Weeks => TimeDelta::try_weeks(value),
        }
    }
}

/// When a job fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Every `value` units, counted from the previous run
    Interval { unit: IntervalUnit, value: u32 },
    /// Crontab expression, e.g. `30 2 * * 1-5`
    Cron { expression: String },
}

impl Trigger {
    pub fn interval(unit: IntervalUnit, value: u32) -> Self {
        Trigger::Interval { unit, value }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Trigger::Cron {
            expression: expression.into(),
        }
    }

    /// Reject triggers that can never fire
    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            Trigger::Interval { value: 0, .. } => Err(JobError::InvalidTrigger(
                "interval value must be at least 1".to_string(),
            )),
            Trigger::Interval { unit, value } => unit
                .delta(*value)
                .map(|_| ())
                .ok_or_else(|| JobError::InvalidTrigger(format!("interval {} {:?} is too large", value, unit))),
            Trigger::Cron { expression } => CronSchedule::parse(expression).map(|_| ()),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval { unit, value } => write!(f, "every {} {:?}", value, unit),
            Trigger::Cron { expression } => write!(f, "cron '{}'", expression),
        }
    }
}

/// First fire time strictly after `after`
///
/// `None` for invalid triggers and for cron expressions with no match in the
/// following years (e.g. `0 0 31 2 *`).
pub fn next_fire_time(trigger: &Trigger, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Interval { value: 0, .. } => None,
        Trigger::Interval { unit, value } => after.checked_add_signed(unit.delta(*value)?),
        Trigger::Cron { expression } => CronSchedule::parse(expression).ok()?.next_after(after),
    }
}

/// Years searched before a cron expression is considered unsatisfiable
const CRON_SEARCH_YEARS: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Parsed crontab expression
///
/// Fields are minute, hour, day of month, month, day of week. Each accepts
/// `*`, numbers, ranges `a-b`, lists `a,b` and steps `*/n` or `a-b/n`.
/// Months and weekdays also accept three-letter names. Weekday 0 and 7 are
/// both Sunday. When both day fields are restricted a day matches if either
/// does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    any_day: bool,
    any_weekday: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, JobError> {
        let invalid = |reason: String| JobError::InvalidTrigger(format!("cron '{}': {}", expression, reason));

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields.as_slice() else {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        };

        let mut weekdays = parse_field(weekday, 0, 7, &WEEKDAY_NAMES, 0).map_err(&invalid)?;
        // 7 is an alias for Sunday
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(minute, 0, 59, &[], 0).map_err(&invalid)?,
            hours: parse_field(hour, 0, 23, &[], 0).map_err(&invalid)?,
            days: parse_field(day, 1, 31, &[], 0).map_err(&invalid)?,
            months: parse_field(month, 1, 12, &MONTH_NAMES, 1).map_err(&invalid)?,
            weekdays,
            any_day: *day == "*",
            any_weekday: *weekday == "*",
        })
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = has(self.days, t.day());
        let dow = has(self.weekdays, t.weekday().num_days_from_sunday());
        match (self.any_day, self.any_weekday) {
            (false, false) => dom || dow,
            _ => dom && dow,
        }
    }

    /// First matching minute strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(TimeDelta::minutes(1))?;
        let last_year = after.year() + CRON_SEARCH_YEARS;

        while t.year() <= last_year {
            if !has(self.months, t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = t.with_minute(0)?.checked_add_signed(TimeDelta::hours(1))?;
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t = t.checked_add_signed(TimeDelta::minutes(1))?;
                continue;
            }
            return Some(t);
        }
        None
    }
}

fn has(set: u64, value: u32) -> bool {
    value < 64 && set & (1 << value) != 0
}

/// Parse one cron field into a bitset of allowed values
///
/// `names[i]` stands for the value `i + name_base`.
fn parse_field(field: &str, min: u32, max: u32, names: &[&str], name_base: u32) -> Result<u64, String> {
    let value = |token: &str| -> Result<u32, String> {
        let lower = token.to_ascii_lowercase();
        if let Some(i) = names.iter().position(|n| *n == lower) {
            return Ok(i as u32 + name_base);
        }
        let v: u32 = token
            .parse()
            .map_err(|_| format!("invalid value '{}'", token))?;
        if v < min || v > max {
            return Err(format!("value {} out of range {}-{}", v, min, max));
        }
        Ok(v)
    };

    let mut set = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}'", step))?;
                if step == 0 {
                    return Err("step must be at least 1".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a)?, value(b)?)
        } else {
            let v = value(range)?;
            // `5/15` means from 5 to the end of the range
            if step > 1 { (v, max) } else { (v, v) }
        };
        if start > end {
            return Err(format!("range {}-{} is reversed", start, end));
        }

        for v in (start..=end).step_by(step as usize) {
            set |= 1 << v;
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_fire_time(&Trigger::cron(expr), after)
    }

    #[test]
    fn test_interval() {
        let start = at(2024, 1, 1, 0, 0);
        let trigger = Trigger::interval(IntervalUnit::Minutes, 90);
        assert_eq!(next_fire_time(&trigger, start), Some(at(2024, 1, 1, 1, 30)));

        let weekly = Trigger::interval(IntervalUnit::Weeks, 2);
        assert_eq!(next_fire_time(&weekly, start), Some(at(2024, 1, 15, 0, 0)));

        let zero = Trigger::interval(IntervalUnit::Seconds, 0);
        assert_eq!(next_fire_time(&zero, start), None);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_cron_every_minute_is_strictly_after() {
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 30).unwrap();
        assert_eq!(next("* * * * *", after), Some(at(2024, 3, 10, 12, 1)));
        assert_eq!(next("* * * * *", at(2024, 3, 10, 12, 0)), Some(at(2024, 3, 10, 12, 1)));
    }

    #[test]
    fn test_cron_hourly_and_daily() {
        let after = at(2024, 3, 10, 12, 15);
        assert_eq!(next("0 * * * *", after), Some(at(2024, 3, 10, 13, 0)));
        assert_eq!(next("30 2 * * *", after), Some(at(2024, 3, 11, 2, 30)));
        assert_eq!(next("*/20 * * * *", after), Some(at(2024, 3, 10, 12, 20)));
    }

    #[test]
    fn test_cron_rollover_month_and_year() {
        assert_eq!(next("0 0 1 * *", at(2024, 1, 31, 23, 59)), Some(at(2024, 2, 1, 0, 0)));
        assert_eq!(next("0 0 1 1 *", at(2024, 6, 1, 0, 0)), Some(at(2025, 1, 1, 0, 0)));
        assert_eq!(next("0 12 29 feb *", at(2024, 3, 1, 0, 0)), Some(at(2028, 2, 29, 12, 0)));
    }

    #[test]
    fn test_cron_weekdays() {
        // 2024-03-10 is a Sunday
        let sunday = at(2024, 3, 10, 12, 0);
        assert_eq!(next("0 9 * * 1-5", sunday), Some(at(2024, 3, 11, 9, 0)));
        assert_eq!(next("0 9 * * sat", sunday), Some(at(2024, 3, 16, 9, 0)));
        assert_eq!(next("0 9 * * 7", sunday), Some(at(2024, 3, 17, 9, 0)));
        assert_eq!(next("0 9 * * 0", sunday), Some(at(2024, 3, 17, 9, 0)));
    }

    #[test]
    fn test_cron_day_fields_are_or_when_both_restricted() {
        // The 15th or any Monday
        let after = at(2024, 3, 12, 0, 0);
        assert_eq!(next("0 0 15 * mon", after), Some(at(2024, 3, 15, 0, 0)));
        assert_eq!(next("0 0 15 * mon", at(2024, 3, 15, 0, 0)), Some(at(2024, 3, 18, 0, 0)));
    }

    #[test]
    fn test_cron_lists_and_stepped_ranges() {
        let after = at(2024, 3, 10, 12, 0);
        assert_eq!(next("5,35 * * * *", after), Some(at(2024, 3, 10, 12, 5)));
        assert_eq!(next("0 8-18/5 * * *", after), Some(at(2024, 3, 10, 13, 0)));
        assert_eq!(next("10/25 * * * *", at(2024, 3, 10, 12, 40)), Some(at(2024, 3, 10, 13, 10)));
    }

    #[test]
    fn test_cron_unsatisfiable() {
        assert_eq!(next("0 0 31 2 *", at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_cron_rejects_malformed() {
        for expr in ["", "* * * *", "60 * * * *", "* 24 * * *", "* * 0 * *", "* * * 13 *", "*/0 * * * *", "5-1 * * * *", "x * * * *"] {
            assert!(CronSchedule::parse(expr).is_err(), "{}", expr);
            assert!(Trigger::cron(expr).validate().is_err(), "{}", expr);
        }
    }

    #[test]
    fn test_trigger_serde_shape() {
        let trigger: Trigger = serde_json::from_str(r#"{"type": "interval", "unit": "hours", "value": 6}"#).unwrap();
        assert_eq!(trigger, Trigger::interval(IntervalUnit::Hours, 6));

        let trigger: Trigger = serde_json::from_str(r#"{"type": "cron", "expression": "0 3 * * *"}"#).unwrap();
        assert_eq!(trigger, Trigger::cron("0 3 * * *"));
    }
}
