//! Retention bucket classes and the index/cap functions used to assign
//! a timestamp to a bucket slot.

use crate::limits::Limits;
use chrono::{DateTime, Datelike, Local, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

pub const ALL: [Interval; 4] = [
    Interval::Hourly,
    Interval::Daily,
    Interval::Weekly,
    Interval::Monthly,
];

impl Interval {
    pub fn name(&self) -> &'static str {
        match self {
            Interval::Hourly => "hourly",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
        }
    }

    /// Non-negative bucket index of `t` relative to `now`, or a negative
    /// number if `t` is in the future (callers must treat that as "out
    /// of cap", never panic or clamp silently into bucket 0).
    pub fn index(&self, now: DateTime<Local>, t: DateTime<Local>) -> i64 {
        match self {
            Interval::Hourly => {
                let now_h = now.date_naive().and_hms_opt(now.hour(), 0, 0).unwrap();
                let t_h = t.date_naive().and_hms_opt(t.hour(), 0, 0).unwrap();
                (now_h - t_h).num_hours()
            }
            Interval::Daily => days_since_epoch(now) - days_since_epoch(t),
            Interval::Weekly => {
                (days_since_epoch(now) as f64 / 7.0).floor() as i64
                    - (days_since_epoch(t) as f64 / 7.0).floor() as i64
            }
            Interval::Monthly => {
                let now_months = now.year() as i64 * 12 + now.month() as i64;
                let t_months = t.year() as i64 * 12 + t.month() as i64;
                now_months - t_months
            }
        }
    }

    pub fn cap(&self, limits: &Limits) -> u32 {
        match self {
            Interval::Hourly => limits.hourly,
            Interval::Daily => limits.daily,
            Interval::Weekly => limits.weekly,
            Interval::Monthly => limits.monthly,
        }
    }
}

use chrono::Timelike;

/// Day number of `dt` relative to the fixed epoch Monday 1970-01-05 UTC.
fn days_since_epoch(dt: DateTime<Local>) -> i64 {
    let epoch: DateTime<Utc> = Utc.with_ymd_and_hms(1970, 1, 5, 0, 0, 0).unwrap();
    let dt_utc: DateTime<Utc> = dt.with_timezone(&Utc);
    (dt_utc - epoch).num_hours() / 24
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn hourly_index_truncates_to_hour() {
        let now = local(2024, 1, 10, 12, 30, 0);
        let t = local(2024, 1, 10, 10, 59, 59);
        assert_eq!(Interval::Hourly.index(now, t), 2);
    }

    #[test]
    fn daily_index_counts_day_boundaries() {
        let now = local(2024, 1, 10, 0, 0, 0);
        let t = local(2024, 1, 7, 23, 59, 59);
        assert_eq!(Interval::Daily.index(now, t), 3);
    }

    #[test]
    fn monthly_index_ignores_day_of_month() {
        let now = local(2024, 3, 1, 0, 0, 0);
        let t = local(2024, 1, 31, 23, 59, 59);
        assert_eq!(Interval::Monthly.index(now, t), 2);
    }

    #[test]
    fn future_snapshot_yields_negative_index() {
        let now = local(2024, 1, 1, 0, 0, 0);
        let t = local(2024, 1, 2, 0, 0, 0);
        assert!(Interval::Daily.index(now, t) < 0);
    }

    #[test]
    fn cap_reads_matching_limit_field() {
        let limits = Limits {
            hourly: 1,
            daily: 2,
            weekly: 3,
            monthly: 4,
        };
        assert_eq!(Interval::Hourly.cap(&limits), 1);
        assert_eq!(Interval::Daily.cap(&limits), 2);
        assert_eq!(Interval::Weekly.cap(&limits), 3);
        assert_eq!(Interval::Monthly.cap(&limits), 4);
    }
}
