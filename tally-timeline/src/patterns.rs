// tally-timeline: Timeline pattern contract and registry

use std::sync::Arc;

use chrono::NaiveDate;

use tally_core::storage::Row;

use crate::days_months::DaysMonths;
use crate::error::TimelineResult;
use crate::timeline::Timeline;

/// An offline rule that folds smaller intervals into larger ones.
pub trait TimelinePattern: Send + Sync {
    fn id(&self) -> &'static str;

    /// Invoke `timeline.merge` for every target interval the rule wants.
    fn merge(&self, timeline: &mut Timeline);

    /// Check the planned mutation against the rule's invariants.
    fn verify(&self, _row: &Row, _timeline: &Timeline, _today: NaiveDate) -> TimelineResult<()> {
        Ok(())
    }
}

/// Look up a built-in pattern by its configured id.
pub fn resolve_pattern(id: &str) -> Option<Arc<dyn TimelinePattern>> {
    match id {
        "days-months" => Some(Arc::new(DaysMonths)),
        _ => None,
    }
}
