// tally-timeline: Merge driver over stored rows

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use tally_core::interval::IntervalKind;
use tally_core::model::Model;
use tally_core::registry::Registry;
use tally_core::site::Site;
use tally_core::storage::{Row, Storage};

use crate::dump::dump_mutation;
use crate::error::TimelineResult;
use crate::patterns::{resolve_pattern, TimelinePattern};
use crate::timeline::Timeline;

/// Outcome counts of one merge run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub scanned: u64,
    pub supported: u64,
    pub merged: u64,
    pub failed: u64,
}

/// Merge one stored row. Returns whether anything changed.
pub fn merge_row(
    storage: &dyn Storage,
    site: &Site,
    row: &Row,
    model: Arc<dyn Model>,
    pattern: &dyn TimelinePattern,
    kind: IntervalKind,
    store: bool,
    dump: Option<&mut dyn Write>,
) -> TimelineResult<bool> {
    let mut timeline = Timeline::new(site.clone(), row.objkey.clone(), model, kind);

    for (key, items) in &row.slots {
        timeline.add(key, items.clone())?;
    }

    if timeline.is_empty() {
        return Ok(false);
    }

    timeline.prepare();
    pattern.merge(&mut timeline);
    timeline.update();

    pattern.verify(row, &timeline, site.current_datetime().date())?;

    if !timeline.modified() {
        return Ok(false);
    }

    if let Some(out) = dump {
        dump_mutation(row, &timeline, out)?;
    }

    timeline.mutate(storage, store)?;
    Ok(true)
}

/// Merge every stored row, resolving model and pattern per object key.
/// Per-row failures are contained and counted.
pub fn merge_rows(
    storage: &dyn Storage,
    site: &Site,
    registry: &Registry,
    kind: IntervalKind,
    store: bool,
    mut dump: Option<&mut dyn Write>,
) -> TimelineResult<MergeStats> {
    fn reborrow<'a>(opt: &'a mut Option<&mut dyn Write>) -> Option<&'a mut dyn Write> {
        match opt {
            Some(w) => Some(&mut **w),
            None => None,
        }
    }

    if store {
        info!("merging history (storing changes)");
    } else {
        info!("merging history (dry run)");
    }

    let mut stats = MergeStats::default();

    for row in storage.iterate_rows()? {
        let row = row?;
        stats.scanned += 1;

        let Some((model, pattern_id)) = registry.model_and_pattern(&row.objkey) else {
            warn!("no model configured for key {}", row.objkey);
            continue;
        };

        let Some(pattern_id) = pattern_id else {
            debug!("no pattern configured for key {}", row.objkey);
            continue;
        };

        let Some(pattern) = resolve_pattern(&pattern_id) else {
            warn!("unknown pattern {} configured for key {}", pattern_id, row.objkey);
            stats.failed += 1;
            continue;
        };

        stats.supported += 1;

        match merge_row(
            storage,
            site,
            &row,
            model,
            pattern.as_ref(),
            kind,
            store,
            reborrow(&mut dump),
        ) {
            Ok(true) => stats.merged += 1,
            Ok(false) => {}
            Err(e) => {
                error!("merge failed for key {}: {}", row.objkey, e);
                stats.failed += 1;
            }
        }
    }

    info!(
        "done: scanned={} supported={} merged={} failed={}",
        stats.scanned, stats.supported, stats.merged, stats.failed
    );

    Ok(stats)
}
