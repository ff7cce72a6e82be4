// tally-timeline: Day-to-month merge pattern
//
// Walks backward month by month, starting two months before today's month
// (the last full month is skipped because it may only just have ended) down
// to the month of the timeline's earliest slot, merging each month's day
// slots into one month slot.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, TimeDelta};

use tally_core::interval::Interval;
use tally_core::storage::Row;

use crate::error::{TimelineError, TimelineResult};
use crate::patterns::TimelinePattern;
use crate::timeline::Timeline;

pub struct DaysMonths;

impl TimelinePattern for DaysMonths {
    fn id(&self) -> &'static str {
        "days-months"
    }

    fn merge(&self, timeline: &mut Timeline) {
        let Some(earliest) = timeline.start() else {
            return;
        };

        let today = timeline.site().current_datetime().date();
        let begin = previous_month(previous_month(today));

        for month in reverse_month_range(begin, earliest.date()) {
            let delta = month_length(month);
            if let Some(start) = month.and_hms_opt(0, 0, 0) {
                timeline.merge(start, delta);
            }
        }
    }

    /// Invariants of a day-to-month mutation: one month slot per month, a
    /// plausible month length, nothing newer than the merge horizon, and
    /// removed slots that are day slots from the stored row belonging to
    /// exactly one merged month.
    fn verify(&self, row: &Row, timeline: &Timeline, today: NaiveDate) -> TimelineResult<()> {
        let sanity = |reason: String| TimelineError::Sanity {
            objkey: timeline.objkey().to_string(),
            reason,
        };
        let kind = timeline.kind();

        let mut updated_months: BTreeMap<String, u32> = BTreeMap::new();

        for key in timeline.updated() {
            let interval = Interval::parse(kind, key)?;
            let month = month_of(key);

            let seen = updated_months.entry(month.clone()).or_insert(0);
            *seen += 1;
            if *seen > 1 {
                return Err(sanity(format!("two updated slots in month {month}")));
            }

            let days = interval.delta().num_days();
            if !(28..=31).contains(&days) {
                return Err(sanity(format!("updated slot {key} spans {days} days")));
            }

            if interval.end().date() > today + TimeDelta::days(28) {
                return Err(sanity(format!("updated slot {key} ends after the merge horizon")));
            }
        }

        let mut removed_seen = std::collections::BTreeSet::new();

        for key in timeline.removed() {
            if !removed_seen.insert(key.clone()) {
                return Err(sanity(format!("slot {key} removed twice")));
            }

            let interval = Interval::parse(kind, key)?;
            if interval.delta().num_days() != 1 {
                return Err(sanity(format!("removed slot {key} is not a day slot")));
            }

            if !row.slots.contains_key(key) {
                return Err(sanity(format!("removed slot {key} was never stored")));
            }

            let month = month_of(key);
            if updated_months.get(&month) != Some(&1) {
                return Err(sanity(format!(
                    "removed slot {key} has no updated slot in month {month}"
                )));
            }
        }

        Ok(())
    }
}

/// The `YYYYMM` prefix of a slot key.
fn month_of(key: &str) -> String {
    key.chars().take(6).collect()
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month after the one containing `date`.
pub fn next_month(date: NaiveDate) -> NaiveDate {
    month_start(month_start(date) + TimeDelta::days(45))
}

/// First day of the month before the one containing `date`.
pub fn previous_month(date: NaiveDate) -> NaiveDate {
    month_start(month_start(date) - TimeDelta::days(15))
}

/// Length of the month starting at `month`.
pub fn month_length(month: NaiveDate) -> TimeDelta {
    next_month(month) - month_start(month)
}

/// Month starts from the month of `later` down to the month of `earlier`.
fn reverse_month_range(later: NaiveDate, earlier: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let floor = month_start(earlier);
    let mut month = month_start(later);

    std::iter::from_fn(move || {
        if month < floor {
            return None;
        }
        let current = month;
        month = previous_month(month);
        Some(current)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn month_stepping() {
        assert_eq!(month_start(date(2024, 2, 29)), date(2024, 2, 1));
        assert_eq!(next_month(date(2024, 1, 15)), date(2024, 2, 1));
        assert_eq!(next_month(date(2023, 12, 31)), date(2024, 1, 1));
        assert_eq!(previous_month(date(2024, 1, 15)), date(2023, 12, 1));
        assert_eq!(previous_month(date(2024, 3, 1)), date(2024, 2, 1));
    }

    #[test]
    fn month_lengths_cover_leap_years() {
        assert_eq!(month_length(date(2024, 2, 1)), TimeDelta::days(29));
        assert_eq!(month_length(date(2023, 2, 1)), TimeDelta::days(28));
        assert_eq!(month_length(date(2024, 1, 1)), TimeDelta::days(31));
        assert_eq!(month_length(date(2024, 4, 1)), TimeDelta::days(30));
    }

    #[test]
    fn reverse_range_walks_inclusive() {
        let months: Vec<NaiveDate> =
            reverse_month_range(date(2024, 2, 10), date(2023, 11, 20)).collect();
        assert_eq!(
            months,
            vec![
                date(2024, 2, 1),
                date(2024, 1, 1),
                date(2023, 12, 1),
                date(2023, 11, 1),
            ]
        );
    }
}
