//! `WorkingClock`: pure functions over `(start, end)` instants and a
//! repository-scoped holiday set (§4.2).
//!
//! Nothing in this crate touches the store or the network; callers hand in
//! whatever holiday set and block-label event stream they have already
//! loaded (typically via `review-state`'s `MRDataCache`).

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

/// One `BlockLabelAdded`/`BlockLabelRemoved` row, reduced to the two facts
/// `BlockedTime` needs to replay the counter.
#[derive(Debug, Clone, Copy)]
pub struct BlockEvent {
    pub timestamp: DateTime<Utc>,
    pub added: bool,
}

/// `IsWorkingDay(date)`: not Saturday/Sunday, not in the holiday set.
/// Holiday dates are compared by `YYYY-MM-DD` in the input's time zone —
/// callers are expected to have already normalized `date` to the zone they
/// care about before calling this.
#[must_use]
pub fn is_working_day(date: NaiveDate, holidays: &HashSet<NaiveDate>) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !holidays.contains(&date)
}

/// `WorkingTime(start, end)`: sum of wall-clock hours in `[start, end]`
/// that fall on non-weekend, non-holiday days. Partial first/last days
/// contribute the fraction of the day inside the window; full middle days
/// contribute 24h. Returns `0` if `end <= start`.
#[must_use]
pub fn working_time(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    holidays: &HashSet<NaiveDate>,
) -> Duration {
    if end <= start {
        return Duration::zero();
    }

    let mut total = Duration::zero();
    let mut cursor_date = start.date_naive();
    let end_date = end.date_naive();

    loop {
        let day_start = Utc
            .from_utc_datetime(&cursor_date.and_hms_opt(0, 0, 0).expect("valid midnight"));
        let day_end = day_start + Duration::days(1);

        let window_start = start.max(day_start);
        let window_end = end.min(day_end);

        if window_end > window_start && is_working_day(cursor_date, holidays) {
            total += window_end - window_start;
        }

        if cursor_date >= end_date {
            break;
        }
        cursor_date = cursor_date.succ_opt().expect("date does not overflow");
    }

    total
}

/// `BlockedTime(mr, repo, start, end)`: replays a 0/1 counter over the
/// full event history (not just events inside `[start, end]`, since prior
/// events determine whether the MR is already blocked when the window
/// opens), clips the resulting intervals to `[start, end]`, and sums their
/// working time. Overlapping block labels contribute once because the
/// counter only opens a new interval on a 0→1 crossing.
///
/// `events` need not be pre-sorted; this function sorts a local copy.
/// If adds/removes never balance (more removes than adds), the counter is
/// clamped at zero and a warning is logged — see the open question in
/// `spec.md` §9.
#[must_use]
pub fn blocked_time(
    events: &[BlockEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    holidays: &HashSet<NaiveDate>,
) -> Duration {
    if end <= start {
        return Duration::zero();
    }

    let mut sorted: Vec<BlockEvent> = events.to_vec();
    sorted.sort_by_key(|e| e.timestamp);

    let mut counter: i64 = 0;
    let mut open_since: Option<DateTime<Utc>> = None;
    let mut total = Duration::zero();

    for event in &sorted {
        if event.added {
            if counter == 0 {
                open_since = Some(event.timestamp);
            }
            counter += 1;
        } else {
            if counter == 0 {
                tracing::warn!(
                    timestamp = %event.timestamp,
                    "BlockedTime: BlockLabelRemoved with no matching open interval; clamping counter at 0"
                );
                continue;
            }
            counter -= 1;
            if counter == 0 {
                if let Some(block_start) = open_since.take() {
                    total += working_time(block_start.max(start), event.timestamp.min(end), holidays);
                }
            }
        }
    }

    if counter > 0 {
        if let Some(block_start) = open_since {
            total += working_time(block_start.max(start), end, holidays);
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn working_time_zero_for_inverted_range() {
        let a = dt(2024, 1, 15, 10, 0);
        let b = dt(2024, 1, 15, 9, 0);
        assert_eq!(working_time(a, b, &HashSet::new()), Duration::zero());
    }

    #[test]
    fn working_time_over_weekend_s3() {
        // Fri 2024-01-12 16:00 -> Mon 2024-01-15 10:00Z == 18h.
        let start = dt(2024, 1, 12, 16, 0);
        let end = dt(2024, 1, 15, 10, 0);
        let holidays = HashSet::new();
        assert_eq!(working_time(start, end, &holidays), Duration::hours(18));
    }

    #[test]
    fn working_time_entirely_weekend_is_zero() {
        let start = dt(2024, 1, 13, 0, 0); // Saturday
        let end = dt(2024, 1, 15, 0, 0); // Monday 00:00
        assert_eq!(working_time(start, end, &HashSet::new()), Duration::zero());
    }

    #[test]
    fn working_time_additive() {
        let a = dt(2024, 1, 10, 9, 0);
        let c = dt(2024, 1, 11, 14, 0);
        let b = dt(2024, 1, 12, 17, 0);
        let holidays = HashSet::new();
        let whole = working_time(a, b, &holidays);
        let parts = working_time(a, c, &holidays) + working_time(c, b, &holidays);
        assert_eq!(whole, parts);
    }

    #[test]
    fn blocked_time_overlapping_labels_count_once() {
        // A blocked t1..t3, B blocked t2..t4, t1<t2<t3<t4.
        let t1 = dt(2024, 1, 15, 9, 0);
        let t2 = dt(2024, 1, 15, 10, 0);
        let t3 = dt(2024, 1, 15, 13, 0);
        let t4 = dt(2024, 1, 15, 15, 0);
        let events = vec![
            BlockEvent { timestamp: t1, added: true },
            BlockEvent { timestamp: t2, added: true },
            BlockEvent { timestamp: t3, added: false },
            BlockEvent { timestamp: t4, added: false },
        ];
        let holidays = HashSet::new();
        let blocked = blocked_time(&events, t1, t4, &holidays);
        let plain = working_time(t1, t4, &holidays);
        assert_eq!(blocked, plain);
    }

    #[test]
    fn blocked_time_weekend_span_s3() {
        let start = dt(2024, 1, 12, 16, 0);
        let end = dt(2024, 1, 15, 10, 0);
        let events = vec![
            BlockEvent { timestamp: start, added: true },
            BlockEvent { timestamp: end, added: false },
        ];
        let holidays = HashSet::new();
        assert_eq!(blocked_time(&events, start, end, &holidays), Duration::hours(18));
    }

    #[test]
    fn blocked_time_clamps_orphan_remove() {
        let start = dt(2024, 1, 15, 9, 0);
        let end = dt(2024, 1, 15, 17, 0);
        let events = vec![BlockEvent { timestamp: start, added: false }];
        let holidays = HashSet::new();
        assert_eq!(blocked_time(&events, start, end, &holidays), Duration::zero());
    }

    #[test]
    fn is_working_day_respects_holidays() {
        let mut holidays = HashSet::new();
        let holiday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        holidays.insert(holiday);
        assert!(!is_working_day(holiday, &holidays));
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert!(is_working_day(monday, &holidays));
    }

    proptest::proptest! {
        #[test]
        fn working_time_additive_prop(
            a_secs in 0i64..1_000_000,
            c_offset in 1i64..500_000,
            b_offset in 1i64..500_000,
        ) {
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let a = base + Duration::seconds(a_secs);
            let c = a + Duration::seconds(c_offset);
            let b = c + Duration::seconds(b_offset);
            let holidays = HashSet::new();
            let whole = working_time(a, b, &holidays);
            let parts = working_time(a, c, &holidays) + working_time(c, b, &holidays);
            prop_assert_eq!(whole, parts);
        }
    }
}
