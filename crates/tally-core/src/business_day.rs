//! # Business Date
//!
//! A store's business day does not end at midnight: sales rung at 01:30
//! after a late shift belong to the previous day. The business date is the
//! local calendar date, shifted back one day while the local time is before
//! the configured cutoff.
//!
//! ```text
//! cutoff 04:00, UTC-3
//!
//!   2026-10-17 02:10 local  ──► business date 2026-10-16
//!   2026-10-17 04:00 local  ──► business date 2026-10-17
//! ```

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

/// Local clock settings that define where business days begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessDayRule {
    pub offset: FixedOffset,
    pub cutoff: NaiveTime,
}

impl BusinessDayRule {
    pub fn new(offset: FixedOffset, cutoff: NaiveTime) -> Self {
        Self { offset, cutoff }
    }

    /// Business date of an instant.
    pub fn business_date(&self, at: DateTime<Utc>) -> NaiveDate {
        let local = at.with_timezone(&self.offset);
        let date = local.date_naive();
        if local.time() < self.cutoff {
            date.checked_sub_days(Days::new(1)).unwrap_or(date)
        } else {
            date
        }
    }
}

impl Default for BusinessDayRule {
    /// UTC with a midnight cutoff.
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            cutoff: NaiveTime::MIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_midnight_cutoff_is_calendar_date() {
        let rule = BusinessDayRule::default();
        assert_eq!(
            rule.business_date(utc("2026-10-17T00:00:00Z")),
            NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
        );
        assert_eq!(
            rule.business_date(utc("2026-10-16T23:59:59Z")),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
        );
    }

    #[test]
    fn test_before_cutoff_belongs_to_previous_day() {
        let rule = BusinessDayRule::new(
            FixedOffset::west_opt(3 * 3600).unwrap(),
            NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
        );

        // 05:10 UTC = 02:10 local
        assert_eq!(
            rule.business_date(utc("2026-10-17T05:10:00Z")),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
        );
        // 07:00 UTC = 04:00 local
        assert_eq!(
            rule.business_date(utc("2026-10-17T07:00:00Z")),
            NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
        );
    }
}
