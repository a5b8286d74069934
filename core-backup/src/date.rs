//! # Date Resolution
//!
//! Instants become calendar dates in one fixed target offset (no DST rules).

use bridge_traits::time::Clock;
use chrono::{DateTime, Datelike, FixedOffset, Months, NaiveDate, Utc};
use std::sync::Arc;

use crate::error::{BackupError, Result};

/// Folder-name format for resolved dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct DateResolver {
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl DateResolver {
    pub fn new(offset: FixedOffset, clock: Arc<dyn Clock>) -> Self {
        Self { offset, clock }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date of `instant` in the target offset.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// `YYYY-MM-DD` folder name for `instant`.
    pub fn folder_name(&self, instant: DateTime<Utc>) -> String {
        format_date(self.local_date(instant))
    }

    /// Today in the target offset.
    pub fn today(&self) -> NaiveDate {
        self.local_date(self.clock.now())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| BackupError::Config(format!("Invalid date '{}', expected YYYY-MM-DD", value)))
}

/// First day of a `YYYY-MM` month.
pub fn parse_month(value: &str) -> Result<NaiveDate> {
    let invalid = || BackupError::Config(format!("Invalid month '{}', expected YYYY-MM", value));
    let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)
}

/// Last day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// `date` moved back by `months`, clamped to the month's last day.
pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::FixedClock;
    use chrono::TimeZone;

    fn resolver_at(now: DateTime<Utc>) -> DateResolver {
        DateResolver::new(
            FixedOffset::east_opt(9 * 3600).unwrap(),
            Arc::new(FixedClock::new(now)),
        )
    }

    #[test]
    fn test_late_utc_evening_is_next_day_at_plus_nine() {
        let resolver = resolver_at(Utc::now());
        let instant = Utc.with_ymd_and_hms(2026, 1, 5, 23, 50, 0).unwrap();
        assert_eq!(resolver.folder_name(instant), "2026-01-06");
    }

    #[test]
    fn test_negative_offset() {
        let resolver = DateResolver::new(
            FixedOffset::west_opt(5 * 3600).unwrap(),
            Arc::new(FixedClock::new(Utc::now())),
        );
        let instant = Utc.with_ymd_and_hms(2026, 1, 6, 3, 0, 0).unwrap();
        assert_eq!(resolver.folder_name(instant), "2026-01-05");
    }

    #[test]
    fn test_today_uses_target_offset() {
        let resolver = resolver_at(Utc.with_ymd_and_hms(2026, 3, 31, 16, 0, 0).unwrap());
        assert_eq!(format_date(resolver.today()), "2026-04-01");
    }

    #[test]
    fn test_month_helpers() {
        let feb = parse_month("2024-02").unwrap();
        assert_eq!(format_date(feb), "2024-02-01");
        assert_eq!(format_date(month_end(feb)), "2024-02-29");
        assert_eq!(format_date(month_end(parse_month("2025-12").unwrap())), "2025-12-31");

        let may31 = NaiveDate::from_ymd_opt(2026, 5, 31).unwrap();
        assert_eq!(format_date(months_before(may31, 3)), "2026-02-28");

        assert!(parse_month("2025-13").is_err());
        assert!(parse_month("2025").is_err());
        assert!(parse_date("2025-02-30").is_err());
    }
}
