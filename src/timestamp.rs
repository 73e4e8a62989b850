//! Opaque textual time key used to name snapshots.
//!
//! A [`Timestamp`] is the string `YYYYMMDD_HHMMSS` in local time. It is
//! totally ordered lexicographically, and that order coincides with
//! chronological order by construction, so sorting a `Vec<Timestamp>`
//! with `sort()` is sufficient everywhere in this crate.

use crate::error::{IncrError, Result};
use chrono::{DateTime, Local, TimeZone};
use std::fmt;
use std::str::FromStr;

pub const FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(String);

impl Timestamp {
    /// Build a timestamp for the current local time.
    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    pub fn from_datetime(dt: DateTime<Local>) -> Self {
        Timestamp(dt.format(FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse to an absolute local instant. Invalid strings return an
    /// error; callers scanning a directory should skip on error rather
    /// than propagate it (see `SnapshotStore::list`).
    pub fn to_datetime(&self) -> Result<DateTime<Local>> {
        let naive = chrono::NaiveDateTime::parse_from_str(&self.0, FORMAT)
            .map_err(|e| IncrError::InvalidTimestamp(format!("{}: {}", self.0, e)))?;

        match Local.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) => Ok(dt),
            chrono::LocalResult::Ambiguous(dt, _) => Ok(dt),
            chrono::LocalResult::None => Err(IncrError::InvalidTimestamp(format!(
                "{} does not correspond to a valid local time",
                self.0
            ))),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Timestamp {
    type Err = IncrError;

    fn from_str(s: &str) -> Result<Self> {
        let ts = Timestamp(s.to_string());
        ts.to_datetime()?;
        Ok(ts)
    }
}

impl AsRef<str> for Timestamp {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The newest element of `remote` that is also present in `local`, or
/// `None` if the intersection is empty (triggers a full send).
///
/// `remote` need not be sorted; `local` is searched by membership only.
pub fn calc_parent(local: &[Timestamp], remote: &[Timestamp]) -> Option<Timestamp> {
    let mut remote_sorted: Vec<&Timestamp> = remote.iter().collect();
    remote_sorted.sort_by(|a, b| b.cmp(a));

    remote_sorted
        .into_iter()
        .find(|r| local.contains(r))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic_and_chronological() {
        let a = Timestamp::from_str("20240101_000000").unwrap();
        let b = Timestamp::from_str("20240102_000000").unwrap();
        let c = Timestamp::from_str("20240101_235959").unwrap();

        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn invalid_timestamp_is_rejected() {
        assert!(Timestamp::from_str("not-a-timestamp").is_err());
        assert!(Timestamp::from_str("20241301_000000").is_err());
    }

    #[test]
    fn calc_parent_picks_newest_common_element() {
        let local: Vec<Timestamp> = ["20240101_000000", "20240102_000000", "20240103_000000"]
            .iter()
            .map(|s| Timestamp::from_str(s).unwrap())
            .collect();
        let remote: Vec<Timestamp> = ["20240101_000000", "20240102_000000"]
            .iter()
            .map(|s| Timestamp::from_str(s).unwrap())
            .collect();

        assert_eq!(
            calc_parent(&local, &remote),
            Some(Timestamp::from_str("20240102_000000").unwrap())
        );
    }

    #[test]
    fn calc_parent_empty_intersection_is_none() {
        let local: Vec<Timestamp> = ["20240101_000000"]
            .iter()
            .map(|s| Timestamp::from_str(s).unwrap())
            .collect();
        let remote: Vec<Timestamp> = ["20240102_000000"]
            .iter()
            .map(|s| Timestamp::from_str(s).unwrap())
            .collect();

        assert_eq!(calc_parent(&local, &remote), None);
    }

    #[test]
    fn calc_parent_no_remote_is_none() {
        let local: Vec<Timestamp> = ["20240101_000000"]
            .iter()
            .map(|s| Timestamp::from_str(s).unwrap())
            .collect();

        assert_eq!(calc_parent(&local, &[]), None);
    }
}
