//! Personal digest scheduling (§4.8): "at 10:00 local time in each
//! subscribed user's recorded timezone offset, on a working day for at
//! least one of the user's repositories, produce the user-actions digest".
//!
//! This module is a pure predicate; the minute-by-minute poll loop and the
//! per-user "already sent today" bookkeeping live in the bot's scheduler.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

pub const DIGEST_HOUR_LOCAL: u32 = 10;

/// Shifts `now_utc` by the user's recorded offset to get their local time.
#[must_use]
pub fn local_time(now_utc: DateTime<Utc>, offset_minutes: i32) -> DateTime<Utc> {
    now_utc + chrono::Duration::minutes(i64::from(offset_minutes))
}

/// Whether the personal digest should fire right now: local hour is 10,
/// today's digest for this user hasn't already gone out, and at least one
/// of the user's subscribed repositories considers today a working day.
#[must_use]
pub fn is_due(local_now: DateTime<Utc>, last_sent_date: Option<NaiveDate>, working_day_in_any_repo: bool) -> bool {
    working_day_in_any_repo && local_now.hour() == DIGEST_HOUR_LOCAL && last_sent_date != Some(local_now.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fires_once_at_ten_local() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap(); // offset +180 => 10:00 local
        let local = local_time(utc, 180);
        assert_eq!(local.hour(), 10);
        assert!(is_due(local, None, true));
    }

    #[test]
    fn does_not_refire_same_day() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap();
        let local = local_time(utc, 180);
        assert!(!is_due(local, Some(local.date_naive()), true));
    }

    #[test]
    fn skips_non_working_day() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap();
        let local = local_time(utc, 180);
        assert!(!is_due(local, None, false));
    }
}
