//! Five-field cron expression → predicate + `NextRun` computation.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};

use super::field::parse_field;
use crate::error::EngineError;

/// Search bound for `next_run`: 366 days of minute-by-minute scanning.
const MAX_SCAN_DAYS: i64 = 366;

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    day: BTreeSet<u32>,
    month: BTreeSet<u32>,
    weekday: BTreeSet<u32>,
    day_restricted: bool,
    weekday_restricted: bool,
    source: String,
}

impl CronSpec {
    /// Parse `"minute hour day month weekday"`.
    pub fn parse(expr: &str) -> Result<Self, EngineError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(EngineError::invalid_input(format!(
                "cron expression must have 5 fields, got {}: {expr:?}",
                fields.len()
            )));
        }

        let minute = parse_field(fields[0], 0, 59, "minute")?;
        let hour = parse_field(fields[1], 0, 23, "hour")?;
        let day = parse_field(fields[2], 1, 31, "day")?;
        let month = parse_field(fields[3], 1, 12, "month")?;
        let weekday = parse_field(fields[4], 0, 6, "weekday")?;

        Ok(Self {
            day_restricted: fields[2].trim() != "*",
            weekday_restricted: fields[4].trim() != "*",
            minute,
            hour,
            day,
            month,
            weekday,
            source: expr.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `t` (truncated to the minute) matches this spec.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minute.contains(&t.minute()) {
            return false;
        }
        if !self.hour.contains(&t.hour()) {
            return false;
        }
        if !self.month.contains(&t.month()) {
            return false;
        }

        let day_ok = self.day.contains(&t.day());
        // chrono's weekday numbering starts Monday; renumber so Sunday = 0.
        let weekday_num = t.weekday().num_days_from_sunday();
        let weekday_ok = self.weekday.contains(&weekday_num);

        match (self.day_restricted, self.weekday_restricted) {
            (true, true) => day_ok || weekday_ok,
            (true, false) => day_ok,
            (false, true) => weekday_ok,
            (false, false) => true,
        }
    }

    /// Smallest timestamp `t > from` (minute granularity) matching this
    /// spec, scanning at most [`MAX_SCAN_DAYS`] ahead.
    pub fn next_run(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
        let start = truncate_to_minute(from) + ChronoDuration::minutes(1);
        let bound = from + ChronoDuration::days(MAX_SCAN_DAYS);

        let mut candidate = start;
        while candidate <= bound {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate += ChronoDuration::minutes(1);
        }

        Err(EngineError::invalid_input(format!(
            "no matching run time for {:?} within {MAX_SCAN_DAYS} days of {from}",
            self.source
        )))
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - ChronoDuration::seconds(t.second() as i64) - ChronoDuration::nanoseconds(t.nanosecond() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSpec::parse("* * *").is_err());
    }

    #[test]
    fn next_run_every_five_minutes() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        let next = spec.next_run(at("2025-01-01T12:00:00Z")).unwrap();
        assert_eq!(next, at("2025-01-01T12:05:00Z"));
    }

    #[test]
    fn next_run_daily_midnight() {
        let spec = CronSpec::parse("0 0 * * *").unwrap();
        let next = spec.next_run(at("2025-01-01T12:00:00Z")).unwrap();
        assert_eq!(next, at("2025-01-02T00:00:00Z"));
    }

    #[test]
    fn tie_break_either_matches_when_both_restricted() {
        // 2025-01-01 is a Wednesday (weekday 3). Restrict day-of-month to 15
        // and weekday to Monday(1); the 1st doesn't match day but also
        // doesn't match weekday, so it must not match; the 6th (Monday)
        // should match via weekday even though day=6 != 15.
        let spec = CronSpec::parse("0 0 15 * 1").unwrap();
        assert!(!spec.matches(at("2025-01-01T00:00:00Z")));
        assert!(spec.matches(at("2025-01-06T00:00:00Z"))); // Monday
        assert!(spec.matches(at("2025-01-15T00:00:00Z"))); // 15th (Wednesday)
    }

    #[test]
    fn only_weekday_restricted_ignores_day() {
        let spec = CronSpec::parse("0 0 * * 1").unwrap();
        assert!(spec.matches(at("2025-01-06T00:00:00Z"))); // Monday
        assert!(!spec.matches(at("2025-01-07T00:00:00Z"))); // Tuesday
    }

    #[test]
    fn no_earlier_match_in_open_interval() {
        let spec = CronSpec::parse("*/7 * * * *").unwrap();
        let from = at("2025-03-01T00:00:00Z");
        let next = spec.next_run(from).unwrap();
        assert!(spec.matches(next));
        let mut t = from + ChronoDuration::minutes(1);
        while t < next {
            assert!(!spec.matches(t));
            t += ChronoDuration::minutes(1);
        }
    }

    #[test]
    fn unsatisfiable_spec_reports_scan_failure() {
        // Feb 30th never exists.
        let spec = CronSpec::parse("0 0 30 2 *").unwrap();
        let err = spec.next_run(at("2025-01-01T00:00:00Z")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn chrono_sunday_is_zero() {
        // 2025-01-05 is a Sunday.
        assert_eq!(Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap().weekday().num_days_from_sunday(), 0);
    }
}
