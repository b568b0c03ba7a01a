//! Cron expression parsing and occurrence calculation
//!
//! Supports the classic five-field form: minute, hour, day-of-month, month,
//! day-of-week. Each field accepts `*`, single values, inclusive ranges,
//! comma-separated lists, and `base/step` expressions. Day-of-week accepts
//! both 0 and 7 for Sunday.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{Error, Result};

/// Upper bound on the occurrence search, in days (four years)
const SEARCH_HORIZON_DAYS: i64 = 1461;

/// A parsed cron schedule
///
/// Matching is field-wise conjunction, except for the day fields: an instant's
/// day qualifies when its day-of-month *or* its day-of-week is in the
/// respective set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    /// The source expression, kept for diagnostics
    expression: String,

    /// Minutes (0-59)
    minutes: BTreeSet<u8>,

    /// Hours (0-23)
    hours: BTreeSet<u8>,

    /// Days of month (1-31)
    days_of_month: BTreeSet<u8>,

    /// Months (1-12)
    months: BTreeSet<u8>,

    /// Days of week (0-6, Sunday = 0)
    days_of_week: BTreeSet<u8>,
}

impl CronSchedule {
    /// Parse a five-field cron expression
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::invalid_cron(
                expression,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let wrap = |reason: String| Error::invalid_cron(expression, reason);

        let minutes = parse_field(fields[0], 0, 59).map_err(wrap)?;
        let hours = parse_field(fields[1], 0, 23).map_err(wrap)?;
        let days_of_month = parse_field(fields[2], 1, 31).map_err(wrap)?;
        let months = parse_field(fields[3], 1, 12).map_err(wrap)?;

        // Day-of-week allows 7 as an alias for Sunday
        let mut days_of_week = parse_field(fields[4], 0, 7).map_err(wrap)?;
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
        })
    }

    /// Get the source expression
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Check whether an instant matches this schedule
    ///
    /// Seconds are ignored; schedules have whole-minute resolution.
    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        self.minutes.contains(&(instant.minute() as u8))
            && self.hours.contains(&(instant.hour() as u8))
            && self.months.contains(&(instant.month() as u8))
            && self.day_matches(instant)
    }

    /// Find the smallest whole-minute instant strictly after `after` that
    /// matches this schedule
    ///
    /// The search is bounded: if nothing matches within four years the
    /// schedule is considered unsatisfiable and `NoNextOccurrence` is
    /// returned.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let limit = after + Duration::days(SEARCH_HORIZON_DAYS);
        let mut instant = truncate_to_minute(after) + Duration::minutes(1);

        while instant <= limit {
            if !self.months.contains(&(instant.month() as u8)) {
                instant = start_of_next_day(instant);
                continue;
            }
            if !self.day_matches(instant) {
                instant = start_of_next_day(instant);
                continue;
            }
            if !self.hours.contains(&(instant.hour() as u8)) {
                instant = start_of_next_hour(instant);
                continue;
            }
            if !self.minutes.contains(&(instant.minute() as u8)) {
                instant += Duration::minutes(1);
                continue;
            }
            return Ok(instant);
        }

        Err(Error::NoNextOccurrence(self.expression.clone()))
    }

    /// Day-of-month OR day-of-week, Sunday = 0
    fn day_matches(&self, instant: DateTime<Utc>) -> bool {
        let day_of_week = instant.weekday().num_days_from_sunday() as u8;
        self.days_of_month.contains(&(instant.day() as u8))
            || self.days_of_week.contains(&day_of_week)
    }
}

/// Drop seconds and sub-second precision
fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        - Duration::seconds(i64::from(instant.second()))
        - Duration::nanoseconds(i64::from(instant.nanosecond()))
}

/// Midnight of the following day (expects a minute-truncated input)
fn start_of_next_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant - Duration::hours(i64::from(instant.hour()))
        - Duration::minutes(i64::from(instant.minute()))
        + Duration::days(1)
}

/// Top of the following hour (expects a minute-truncated input)
fn start_of_next_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant - Duration::minutes(i64::from(instant.minute())) + Duration::hours(1)
}

/// Parse one field into its value set
fn parse_field(text: &str, min: u8, max: u8) -> std::result::Result<BTreeSet<u8>, String> {
    let mut values = BTreeSet::new();

    for part in text.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step_text)) => {
                let step: usize = step_text
                    .parse()
                    .map_err(|_| format!("step '{}' is not an integer", step_text))?;
                if step == 0 {
                    return Err(format!("step in '{}' must be positive", part));
                }
                (base, step)
            }
            None => (part, 1),
        };

        // Steps retain every step-th value of the ordered base set
        for value in expand_base(base, min, max)?.iter().step_by(step) {
            values.insert(*value);
        }
    }

    Ok(values)
}

/// Expand `*`, `a-b`, or a single value into an ordered list
fn expand_base(base: &str, min: u8, max: u8) -> std::result::Result<Vec<u8>, String> {
    if base == "*" {
        return Ok((min..=max).collect());
    }
    if let Some((lo_text, hi_text)) = base.split_once('-') {
        let lo = parse_value(lo_text, min, max)?;
        let hi = parse_value(hi_text, min, max)?;
        if lo > hi {
            return Err(format!("range '{}' is inverted", base));
        }
        return Ok((lo..=hi).collect());
    }
    Ok(vec![parse_value(base, min, max)?])
}

/// Parse a single bounds-checked value
fn parse_value(text: &str, min: u8, max: u8) -> std::result::Result<u8, String> {
    let value: u8 = text
        .parse()
        .map_err(|_| format!("'{}' is not an integer", text))?;
    if value < min || value > max {
        return Err(format!("value {} out of range {}-{}", value, min, max));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_wildcard() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(schedule.minutes.len(), 60);
        assert_eq!(schedule.hours.len(), 24);
        assert_eq!(schedule.days_of_month.len(), 31);
        assert_eq!(schedule.months.len(), 12);
        assert_eq!(schedule.days_of_week.len(), 7);
    }

    #[test]
    fn test_parse_lists_and_ranges() {
        let schedule = CronSchedule::parse("0,30 9-17 1,15 * 1-5").unwrap();
        assert_eq!(schedule.minutes, BTreeSet::from([0, 30]));
        assert_eq!(schedule.hours, (9..=17).collect());
        assert_eq!(schedule.days_of_month, BTreeSet::from([1, 15]));
        assert_eq!(schedule.days_of_week, (1..=5).collect());
    }

    #[test]
    fn test_parse_steps() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(schedule.minutes, BTreeSet::from([0, 15, 30, 45]));

        // Steps over ranges count indices, not values
        let schedule = CronSchedule::parse("1-9/3 * * * *").unwrap();
        assert_eq!(schedule.minutes, BTreeSet::from([1, 4, 7]));

        // A single-value base with a step is just that value
        let schedule = CronSchedule::parse("5/2 * * * *").unwrap();
        assert_eq!(schedule.minutes, BTreeSet::from([5]));
    }

    #[test]
    fn test_sunday_aliases() {
        let with_seven = CronSchedule::parse("0 0 * * 7").unwrap();
        let with_zero = CronSchedule::parse("0 0 * * 0").unwrap();
        assert_eq!(with_seven.days_of_week, with_zero.days_of_week);
        assert_eq!(with_zero.days_of_week, BTreeSet::from([0]));
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        for expression in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * 32 * *",
            "* * * 13 *",
            "* * * * 8",
            "5-1 * * * *",
            "*/0 * * * *",
            "*/x * * * *",
            "a * * * *",
            "1,,2 * * * *",
            "1- * * * *",
        ] {
            assert!(
                CronSchedule::parse(expression).is_err(),
                "expected parse failure for '{}'",
                expression
            );
        }
    }

    #[test]
    fn test_matches() {
        let schedule = CronSchedule::parse("30 14 * * *").unwrap();
        assert!(schedule.matches(at(2024, 3, 5, 14, 30, 0)));
        assert!(schedule.matches(at(2024, 3, 5, 14, 30, 59)));
        assert!(!schedule.matches(at(2024, 3, 5, 14, 31, 0)));
        assert!(!schedule.matches(at(2024, 3, 5, 15, 30, 0)));
    }

    #[test]
    fn test_day_fields_are_a_union() {
        // Both day fields restricted: either may admit the day.
        // 2024-03-01 is a Friday (5); 2024-03-15 is also a Friday.
        let schedule = CronSchedule::parse("0 0 15 * 1").unwrap();
        assert!(schedule.matches(at(2024, 3, 15, 0, 0, 0))); // the 15th, a Friday
        assert!(schedule.matches(at(2024, 3, 4, 0, 0, 0))); // a Monday
        assert!(!schedule.matches(at(2024, 3, 5, 0, 0, 0))); // a plain Tuesday
    }

    #[test]
    fn test_next_occurrence_daily() {
        let schedule = CronSchedule::parse("0 12 * * *").unwrap();
        let next = schedule.next_occurrence(at(2024, 1, 1, 15, 30, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 2, 12, 0, 0));
    }

    #[test]
    fn test_next_occurrence_step() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let next = schedule.next_occurrence(at(2024, 1, 1, 10, 3, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 10, 5, 0));
    }

    #[test]
    fn test_next_occurrence_is_strictly_after() {
        // An instant that itself matches must not be returned
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let next = schedule.next_occurrence(at(2024, 1, 1, 10, 5, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 10, 10, 0));
    }

    #[test]
    fn test_next_occurrence_crosses_month_and_year() {
        let schedule = CronSchedule::parse("0 0 1 * *").unwrap();
        let next = schedule
            .next_occurrence(at(2024, 12, 15, 8, 0, 0))
            .unwrap();
        assert_eq!(next, at(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_next_occurrence_matches_schedule() {
        for expression in ["* * * * *", "*/7 3 * * *", "15 6 1 * *", "0 0 * * 1"] {
            let schedule = CronSchedule::parse(expression).unwrap();
            let after = at(2024, 5, 17, 22, 41, 13);
            let next = schedule.next_occurrence(after).unwrap();
            assert!(next > after);
            assert!(schedule.matches(next), "'{}' produced a non-match", expression);
            assert_eq!(next.second(), 0);
        }
    }

    #[test]
    fn test_leap_day_schedule() {
        // The 29th of February is four years out at worst
        let schedule = CronSchedule::parse("0 0 29 2 *").unwrap();
        let next = schedule.next_occurrence(at(2024, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn test_search_horizon_bound() {
        // No parseable expression produces an empty day set, so exercise the
        // four-year bound on a hand-built schedule that can never match.
        let schedule = CronSchedule {
            expression: "unsatisfiable".to_string(),
            minutes: BTreeSet::from([0]),
            hours: BTreeSet::from([0]),
            days_of_month: BTreeSet::from([30]),
            months: BTreeSet::from([2]),
            days_of_week: BTreeSet::new(),
        };
        let result = schedule.next_occurrence(at(2024, 1, 1, 0, 0, 0));
        assert!(matches!(result, Err(Error::NoNextOccurrence(_))));
    }
}
