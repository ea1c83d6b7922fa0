//! Time-bucket arithmetic and partition naming
//!
//! An [`Interval`] decides how wide a single partition is and how it is named:
//!
//! | Interval  | Bucket start | Name                |
//! |-----------|--------------|---------------------|
//! | `Daily`   | `YYYY-MM-DD` | `table_2024_02_29`  |
//! | `Monthly` | `YYYY-MM-01` | `table_2024_02`     |
//! | `Yearly`  | `YYYY-01-01` | `table_2024`        |
//!
//! All timestamps are UTC. Bucket starts are always midnight.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Unknown interval '{0}', expected daily, monthly or yearly")]
pub struct ParseIntervalError(String);

/// Partition granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Monthly,
    Yearly,
}

/// Calendar fields advanced by a single step, applied like a calendar
/// `add_date(years, months, days)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub days: u32,
    pub months: u32,
    pub years: u32,
}

impl Interval {
    pub fn step(&self) -> Step {
        match self {
            Interval::Daily => Step { days: 1, months: 0, years: 0 },
            Interval::Monthly => Step { days: 0, months: 1, years: 0 },
            Interval::Yearly => Step { days: 0, months: 0, years: 1 },
        }
    }

    /// strftime pattern of the partition name suffix
    pub fn suffix_format(&self) -> &'static str {
        match self {
            Interval::Daily => "%Y_%m_%d",
            Interval::Monthly => "%Y_%m",
            Interval::Yearly => "%Y",
        }
    }

    /// Floor `ts` to the start of its bucket (midnight, with finer date fields set to 1)
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            Interval::Daily => date,
            Interval::Monthly => date - Days::new(u64::from(date.day0())),
            Interval::Yearly => date - Days::new(u64::from(date.ordinal0())),
        };
        start.and_time(NaiveTime::MIN).and_utc()
    }

    /// Move `times` buckets forward, keeping the time of day
    ///
    /// Returns `None` if the result is not representable.
    pub fn increment(&self, ts: DateTime<Utc>, times: u32) -> Option<DateTime<Utc>> {
        self.shift(ts, i64::from(times))
    }

    /// Move `times` buckets backward, keeping the time of day
    pub fn decrement(&self, ts: DateTime<Utc>, times: u32) -> Option<DateTime<Utc>> {
        self.shift(ts, -i64::from(times))
    }

    /// Name of the partition holding `ts`: `<table>_<suffix>`
    pub fn partition_name(&self, ts: DateTime<Utc>, table: &str) -> String {
        let suffix = self.truncate(ts).format(self.suffix_format());
        format!("{}_{}", table, suffix)
    }

    /// Inverse of [`Interval::partition_name`]
    ///
    /// Returns the bucket start for names following this interval's scheme,
    /// `None` for anything else (foreign or manually created partitions).
    pub fn parse_partition_name(&self, name: &str, table: &str) -> Option<DateTime<Utc>> {
        let suffix = name.strip_prefix(table)?.strip_prefix('_')?;
        let date = match self {
            Interval::Daily => NaiveDate::parse_from_str(suffix, "%Y_%m_%d").ok()?,
            Interval::Monthly => {
                NaiveDate::parse_from_str(&format!("{}_01", suffix), "%Y_%m_%d").ok()?
            }
            Interval::Yearly => {
                if !suffix.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                NaiveDate::from_ymd_opt(suffix.parse().ok()?, 1, 1)?
            }
        };
        let ts = date.and_time(NaiveTime::MIN).and_utc();

        // reject loose spellings like "2024_2" that chrono happily parses
        (self.partition_name(ts, table) == name).then_some(ts)
    }

    fn shift(&self, ts: DateTime<Utc>, times: i64) -> Option<DateTime<Utc>> {
        let step = self.step();
        let months = (i64::from(step.years) * 12 + i64::from(step.months)).checked_mul(times)?;
        let days = i64::from(step.days).checked_mul(times)?;

        add_months(ts, months)?.checked_add_signed(TimeDelta::try_days(days)?)
    }
}

/// Calendar month arithmetic
///
/// A day-of-month that doesn't exist in the target month overflows into the
/// following one: Jan 31 + 1 month = Mar 2 (Mar 3 in leap years), Feb 29 + 1 year = Mar 1.
fn add_months(ts: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let total = (i64::from(ts.year()) * 12 + i64::from(ts.month0())).checked_add(months)?;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;

    let date = NaiveDate::from_ymd_opt(year, month, 1)?
        .checked_add_days(Days::new(u64::from(ts.day0())))?;
    Some(date.and_time(ts.time()).and_utc())
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interval::Daily => "daily",
            Interval::Monthly => "monthly",
            Interval::Yearly => "yearly",
        };
        f.write_str(name)
    }
}

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(Interval::Daily),
            "monthly" | "month" => Ok(Interval::Monthly),
            "yearly" | "year" => Ok(Interval::Yearly),
            _ => Err(ParseIntervalError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn midnight(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        at(y, m, d, 0, 0, 0)
    }

    fn leap_day() -> DateTime<Utc> {
        at(2024, 2, 29, 12, 34, 56)
    }

    fn trunc_and_inc(interval: Interval, ts: DateTime<Utc>, times: u32) -> DateTime<Utc> {
        interval.increment(interval.truncate(ts), times).unwrap()
    }

    #[test]
    fn test_partition_names() {
        let ts = leap_day();

        assert_eq!(Interval::Daily.partition_name(ts, "foo"), "foo_2024_02_29");
        assert_eq!(
            Interval::Daily.partition_name(trunc_and_inc(Interval::Daily, ts, 7), "foo"),
            "foo_2024_03_07"
        );

        assert_eq!(Interval::Monthly.partition_name(ts, "foo"), "foo_2024_02");
        assert_eq!(
            Interval::Monthly.partition_name(trunc_and_inc(Interval::Monthly, ts, 2), "foo"),
            "foo_2024_04"
        );

        assert_eq!(Interval::Yearly.partition_name(ts, "foo"), "foo_2024");
        assert_eq!(
            Interval::Yearly.partition_name(trunc_and_inc(Interval::Yearly, ts, 1), "foo"),
            "foo_2025"
        );
    }

    #[test]
    fn test_truncate() {
        let ts = leap_day();

        assert_eq!(Interval::Daily.truncate(ts), midnight(2024, 2, 29));
        assert_eq!(Interval::Monthly.truncate(ts), midnight(2024, 2, 1));
        assert_eq!(Interval::Yearly.truncate(ts), midnight(2024, 1, 1));
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let ts = at(2023, 11, 17, 23, 59, 59);
        for interval in [Interval::Daily, Interval::Monthly, Interval::Yearly] {
            let once = interval.truncate(ts);
            assert_eq!(interval.truncate(once), once, "{interval}");
        }
    }

    #[test]
    fn test_increment_keeps_time_of_day() {
        let ts = leap_day();

        assert_eq!(Interval::Daily.increment(ts, 1).unwrap(), at(2024, 3, 1, 12, 34, 56));
        assert_eq!(Interval::Monthly.increment(ts, 1).unwrap(), at(2024, 3, 29, 12, 34, 56));
        // 2025 has no Feb 29
        assert_eq!(Interval::Yearly.increment(ts, 1).unwrap(), at(2025, 3, 1, 12, 34, 56));
    }

    #[test]
    fn test_decrement_keeps_time_of_day() {
        let ts = leap_day();

        assert_eq!(Interval::Daily.decrement(ts, 1).unwrap(), at(2024, 2, 28, 12, 34, 56));
        assert_eq!(Interval::Monthly.decrement(ts, 1).unwrap(), at(2024, 1, 29, 12, 34, 56));
        // 2023 has no Feb 29
        assert_eq!(Interval::Yearly.decrement(ts, 1).unwrap(), at(2023, 3, 1, 12, 34, 56));
    }

    #[test]
    fn test_truncate_then_increment() {
        let ts = leap_day();

        assert_eq!(trunc_and_inc(Interval::Daily, ts, 1), midnight(2024, 3, 1));
        assert_eq!(trunc_and_inc(Interval::Monthly, ts, 1), midnight(2024, 3, 1));
        assert_eq!(trunc_and_inc(Interval::Yearly, ts, 1), midnight(2025, 1, 1));
    }

    #[test]
    fn test_monthly_crosses_year_boundaries() {
        let start = midnight(2023, 11, 1);

        assert_eq!(Interval::Monthly.increment(start, 3).unwrap(), midnight(2024, 2, 1));
        assert_eq!(Interval::Monthly.decrement(start, 11).unwrap(), midnight(2022, 12, 1));
        assert_eq!(Interval::Monthly.decrement(start, 24).unwrap(), midnight(2021, 11, 1));
    }

    #[test]
    fn test_month_end_overflow() {
        assert_eq!(
            Interval::Monthly.increment(midnight(2023, 1, 31), 1).unwrap(),
            midnight(2023, 3, 3)
        );
        assert_eq!(
            Interval::Monthly.increment(midnight(2024, 1, 31), 1).unwrap(),
            midnight(2024, 3, 2)
        );
    }

    #[test]
    fn test_out_of_range() {
        let ts = midnight(2024, 1, 1);
        assert!(Interval::Yearly.increment(ts, u32::MAX).is_none());
        assert!(Interval::Daily.decrement(ts, u32::MAX).is_none());
    }

    #[test]
    fn test_step_matches_increment() {
        let ts = Utc.with_ymd_and_hms(2023, 1, 31, 6, 0, 0).unwrap();

        assert_eq!(Interval::Daily.step(), Step { days: 1, months: 0, years: 0 });
        assert_eq!(
            Interval::Daily.increment(ts, 1),
            Some(Utc.with_ymd_and_hms(2023, 2, 1, 6, 0, 0).unwrap())
        );
        assert_eq!(
            Interval::Yearly.increment(ts, 2),
            Interval::Monthly.increment(ts, 24)
        );
    }

    #[test]
    fn test_parse_partition_name() {
        assert_eq!(
            Interval::Daily.parse_partition_name("foo_2024_02_29", "foo"),
            Some(midnight(2024, 2, 29))
        );
        assert_eq!(
            Interval::Monthly.parse_partition_name("foo_2024_02", "foo"),
            Some(midnight(2024, 2, 1))
        );
        assert_eq!(
            Interval::Yearly.parse_partition_name("foo_2024", "foo"),
            Some(midnight(2024, 1, 1))
        );

        assert_eq!(Interval::Monthly.parse_partition_name("foo_default", "foo"), None);
        assert_eq!(Interval::Monthly.parse_partition_name("foo_2024_02_01", "foo"), None);
        assert_eq!(Interval::Monthly.parse_partition_name("foo_2024_2", "foo"), None);
        assert_eq!(Interval::Monthly.parse_partition_name("bar_2024_02", "foo"), None);
        assert_eq!(Interval::Yearly.parse_partition_name("foo_+2024", "foo"), None);
    }

    #[test]
    fn test_names_are_distinct_per_bucket() {
        let mut ts = midnight(2020, 1, 1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..800 {
            assert!(seen.insert(Interval::Daily.partition_name(ts, "t")));
            ts = Interval::Daily.increment(ts, 1).unwrap();
        }
    }

    #[test]
    fn test_from_str() {
        assert_eq!("monthly".parse::<Interval>().unwrap(), Interval::Monthly);
        assert_eq!(" Daily ".parse::<Interval>().unwrap(), Interval::Daily);
        assert_eq!("year".parse::<Interval>().unwrap(), Interval::Yearly);
        assert!("hourly".parse::<Interval>().is_err());
        assert_eq!(Interval::Yearly.to_string(), "yearly");
    }
}
