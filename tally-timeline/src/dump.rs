// tally-timeline: Human-readable dump of a planned mutation

use std::io::Write;

use serde_json::Value;

use tally_core::model::Values;
use tally_core::storage::Row;

use crate::timeline::Timeline;

type Entry<'a> = (String, Option<Values>, Option<&'a Values>);

/// Print the planned mutation of one row: what gets updated, inserted,
/// removed, and what stays untouched.
pub fn dump_mutation(row: &Row, timeline: &Timeline, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "Key: {}", row.objkey)?;

    let mut updated: Vec<Entry> = Vec::new();
    let mut inserted: Vec<Entry> = Vec::new();

    for key in timeline.updated() {
        let new = timeline.slot_values(key);
        match row.slots.get(key) {
            Some(old) => updated.push((key.clone(), new, Some(old))),
            None => inserted.push((key.clone(), new, None)),
        }
    }

    let mut removed: Vec<Entry> = timeline
        .removed()
        .iter()
        .map(|key| (key.clone(), None, row.slots.get(key)))
        .collect();

    let mut changed: Vec<&String> = timeline.updated().iter().collect();
    changed.extend(timeline.removed());

    let mut unchanged: Vec<Entry> = row
        .slots
        .iter()
        .filter(|(key, _)| !changed.contains(key))
        .map(|(key, values)| (key.clone(), None, Some(values)))
        .collect();

    updated.sort_by(|a, b| a.0.cmp(&b.0));
    inserted.sort_by(|a, b| a.0.cmp(&b.0));
    removed.sort_by(|a, b| a.0.cmp(&b.0));
    unchanged.sort_by(|a, b| a.0.cmp(&b.0));

    for (title, entries) in [
        ("Updated", updated),
        ("Inserted", inserted),
        ("Removed", removed),
        ("Unchanged", unchanged),
    ] {
        if entries.is_empty() {
            continue;
        }

        writeln!(out, "{title}:")?;
        for (key, new, old) in entries {
            writeln!(out, "  Slot: {key}")?;
            if let Some(values) = old {
                dump_values(out, "Old", values)?;
            }
            if let Some(values) = &new {
                dump_values(out, "New", values)?;
            }
        }
    }

    writeln!(out)?;
    out.flush()
}

fn dump_values(out: &mut dyn Write, title: &str, values: &Values) -> std::io::Result<()> {
    writeln!(out, "    {title}:")?;
    for (key, value) in values {
        writeln!(out, "      {key}: {}", compact(value))?;
    }
    Ok(())
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
