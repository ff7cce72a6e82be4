// tally-core: Typed time intervals with canonical string keys

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::error::IntervalError;

/// Interval granularity. One kind is selected per run from the
/// `[interval]` configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Day,
    Hour,
}

impl IntervalKind {
    /// The delta of an unsuffixed key.
    pub fn basic_delta(&self) -> TimeDelta {
        match self {
            IntervalKind::Day => TimeDelta::days(1),
            IntervalKind::Hour => TimeDelta::hours(1),
        }
    }

    /// Zero the time components below this granularity.
    pub fn truncate(&self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        match self {
            IntervalKind::Day => start_of(date, 0),
            IntervalKind::Hour => start_of(date, t.hour()),
        }
    }
}

impl FromStr for IntervalKind {
    type Err = IntervalError;

    fn from_str(name: &str) -> Result<Self, IntervalError> {
        match name {
            "day" => Ok(IntervalKind::Day),
            "hour" => Ok(IntervalKind::Hour),
            _ => Err(IntervalError::UnknownModule(name.to_string())),
        }
    }
}

/// A half-open `[start, start + delta)` time range with a canonical key:
/// `YYYYMMDD[_days]` for day granularity, `YYYYMMDDHH[_hours]` for hour
/// granularity. The suffix is omitted when `delta` is the basic delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    kind: IntervalKind,
    start: NaiveDateTime,
    delta: TimeDelta,
}

impl Interval {
    pub fn new(kind: IntervalKind, start: NaiveDateTime, delta: TimeDelta) -> Self {
        Self { kind, start, delta }
    }

    /// Interval of the basic delta starting at `start`.
    pub fn basic(kind: IntervalKind, start: NaiveDateTime) -> Self {
        Self::new(kind, start, kind.basic_delta())
    }

    /// The basic interval containing `now`.
    pub fn containing(kind: IntervalKind, now: NaiveDateTime) -> Self {
        Self::basic(kind, kind.truncate(now))
    }

    pub fn kind(&self) -> IntervalKind {
        self.kind
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn delta(&self) -> TimeDelta {
        self.delta
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start + self.delta
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end()
    }

    pub fn key(&self) -> String {
        match self.kind {
            IntervalKind::Day => {
                let mut key = self.start.format("%Y%m%d").to_string();
                if self.delta != self.kind.basic_delta() {
                    key.push_str(&format!("_{}", self.delta.num_days()));
                }
                key
            }
            IntervalKind::Hour => {
                let mut key = self.start.format("%Y%m%d%H").to_string();
                if self.delta != self.kind.basic_delta() {
                    key.push_str(&format!("_{}", self.delta.num_hours()));
                }
                key
            }
        }
    }

    /// Inverse of `key`.
    pub fn parse(kind: IntervalKind, key: &str) -> Result<Self, IntervalError> {
        let bad = || IntervalError::BadKey(key.to_string());

        let (stamp, suffix) = match key.split_once('_') {
            Some((stamp, suffix)) => (stamp, Some(suffix)),
            None => (key, None),
        };

        let units = match suffix {
            Some(text) => text.parse::<i64>().map_err(|_| bad())?,
            None => 1,
        };
        if units < 1 {
            return Err(bad());
        }

        let digits = match kind {
            IntervalKind::Day => 8,
            IntervalKind::Hour => 10,
        };
        if stamp.len() != digits || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }

        let year: i32 = stamp[0..4].parse().map_err(|_| bad())?;
        let month: u32 = stamp[4..6].parse().map_err(|_| bad())?;
        let day: u32 = stamp[6..8].parse().map_err(|_| bad())?;
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(bad)?;

        let (start, delta) = match kind {
            IntervalKind::Day => (start_of(date, 0), TimeDelta::days(units)),
            IntervalKind::Hour => {
                let hour: u32 = stamp[8..10].parse().map_err(|_| bad())?;
                if hour > 23 {
                    return Err(bad());
                }
                (start_of(date, hour), TimeDelta::hours(units))
            }
        };

        Ok(Self::new(kind, start, delta))
    }
}

// Earlier start sorts first; at equal start the longer interval sorts first,
// so a containing interval precedes its sub-intervals.
impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| other.delta.cmp(&self.delta))
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn start_of(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, 0, 0)
        .unwrap_or_else(|| date.and_time(Default::default()))
}
