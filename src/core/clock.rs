//! Wall-clock and local calendar abstraction

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, TimeZone, Utc};

pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Source of "now" and of the deployment's local calendar.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// UTC offset of the local zone in effect at `at`.
    fn local_offset(&self, at: DateTime<Utc>) -> FixedOffset;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Local calendar date of a millisecond timestamp.
    fn local_date(&self, millis: i64) -> Option<NaiveDate> {
        let at = DateTime::from_timestamp_millis(millis)?;
        Some(at.with_timezone(&self.local_offset(at)).date_naive())
    }

    /// Shifts a UTC millisecond timestamp onto the local wall clock, so that
    /// day and hour arithmetic lines up with local boundaries.
    fn to_local_millis(&self, millis: i64) -> i64 {
        match DateTime::from_timestamp_millis(millis) {
            Some(at) => millis + i64::from(self.local_offset(at).local_minus_utc()) * 1000,
            None => millis,
        }
    }

    /// Start of the local calendar day `days_ago` days before today.
    fn local_midnight(&self, days_ago: u32) -> DateTime<Utc> {
        let now = self.now();
        let offset = self.local_offset(now);
        let date = now.with_timezone(&offset).date_naive() - chrono::Days::new(days_ago.into());
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        offset
            .from_local_datetime(&midnight)
            .single()
            .map_or(now, |dt| dt.with_timezone(&Utc))
    }
}

/// The process clock in the host's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self, at: DateTime<Utc>) -> FixedOffset {
        Local.offset_from_utc_datetime(&at.naive_utc()).fix()
    }
}

/// A clock frozen at a given instant in a fixed-offset zone.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { now, offset }
    }

    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn local_offset(&self, _at: DateTime<Utc>) -> FixedOffset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_date_respects_offset() {
        // 2024-03-10 23:30 UTC is already the 11th in UTC+2.
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        let utc = FixedClock::utc(at);
        let east = FixedClock::new(at, FixedOffset::east_opt(2 * 3600).unwrap());

        assert_eq!(
            utc.local_date(at.timestamp_millis()),
            NaiveDate::from_ymd_opt(2024, 3, 10)
        );
        assert_eq!(
            east.local_date(at.timestamp_millis()),
            NaiveDate::from_ymd_opt(2024, 3, 11)
        );
    }

    #[test]
    fn test_local_midnight() {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap();
        let west = FixedClock::new(at, FixedOffset::west_opt(5 * 3600).unwrap());

        assert_eq!(
            west.local_midnight(0),
            Utc.with_ymd_and_hms(2024, 3, 10, 5, 0, 0).unwrap()
        );
        assert_eq!(
            west.local_midnight(1),
            Utc.with_ymd_and_hms(2024, 3, 9, 5, 0, 0).unwrap()
        );
    }
}
