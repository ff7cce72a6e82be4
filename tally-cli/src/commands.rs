// tally-cli: Subcommand implementations

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use tally_config::Config;
use tally_core::backup::SnapshotRecord;
use tally_core::interval::{Interval, IntervalKind};
use tally_core::model::Values;
use tally_core::registry::Registry;
use tally_core::site::Site;
use tally_core::slot::Slot;
use tally_core::storage::{Row, Storage};
use tally_service::open_storages;
use tally_timeline::merge_rows;

use crate::progress::Counter;

pub fn check_force(force: bool) -> Result<()> {
    if force {
        Ok(())
    } else {
        bail!("destructive operation: pass --force to run it");
    }
}

fn interval_kind(config: &Config) -> Result<IntervalKind> {
    Ok(config.interval.module.parse()?)
}

fn storage_for(config: &Config, sitename: &str) -> Result<Arc<dyn Storage>> {
    let mut storages = open_storages(config)?;
    storages
        .remove(sitename)
        .with_context(|| format!("unknown site: {sitename}"))
}

fn site_for(config: &Config, sitename: &str) -> Result<Site> {
    Ok(Site::new(&config.site_spec(sitename)?))
}

/// The slot key a snapshot record belongs to.
fn record_slot_key(record: &SnapshotRecord, kind: IntervalKind) -> Result<String> {
    let start = match (record.interval_start, record.date) {
        (Some(start), _) => start,
        (None, Some(date)) => date
            .and_hms_opt(0, 0, 0)
            .context("bad snapshot date")?,
        (None, None) => bail!("snapshot record carries no interval"),
    };
    Ok(Interval::basic(kind, start).key())
}

fn print_record_as_json(record: &SnapshotRecord, kind: IntervalKind) -> Result<()> {
    let mut document = serde_json::Map::new();
    document.insert(
        record_slot_key(record, kind)?,
        serde_json::to_value(&record.cachedata)?,
    );
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

pub fn export(config: &Config, sitename: &str) -> Result<()> {
    let storage = storage_for(config, sitename)?;

    match storage.get_cache_backup()? {
        Some(backup) => {
            io::stdout().write_all(&backup.blob)?;
            Ok(())
        }
        None => bail!("site {sitename} has no stored snapshot"),
    }
}

pub fn export_json(config: &Config, sitename: &str) -> Result<()> {
    let storage = storage_for(config, sitename)?;

    match storage.get_cache_backup()? {
        Some(backup) => {
            let record = SnapshotRecord::from_bytes(&backup.blob)?;
            print_record_as_json(&record, interval_kind(config)?)
        }
        None => bail!("site {sitename} has no stored snapshot"),
    }
}

pub fn convert_to_json(config: &Config, filename: &Path) -> Result<()> {
    let bytes = fs::read(filename).with_context(|| filename.display().to_string())?;
    let record = SnapshotRecord::from_bytes(&bytes)?;
    print_record_as_json(&record, interval_kind(config)?)
}

fn row_as_json_line(row: &Row) -> Result<String> {
    let mut line = serde_json::Map::new();
    line.insert(row.objkey.clone(), serde_json::to_value(&row.slots)?);
    Ok(serde_json::to_string(&line)?)
}

pub fn export_history(config: &Config, sitename: &str) -> Result<()> {
    let storage = storage_for(config, sitename)?;
    let mut counter = Counter::new(None, 100, "exported rows: ");

    for row in storage.iterate_rows()? {
        println!("{}", row_as_json_line(&row?)?);
        counter.increment();
    }

    counter.done();
    Ok(())
}

fn find_row(storage: &dyn Storage, objkey: &str) -> Result<Option<Row>> {
    for row in storage.iterate_rows()? {
        let row = row?;
        if row.objkey == objkey {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

pub fn export_object_history(config: &Config, sitename: &str, objkey: &str) -> Result<()> {
    let storage = storage_for(config, sitename)?;

    match find_row(storage.as_ref(), objkey)? {
        Some(row) => {
            println!("{}", row_as_json_line(&row)?);
            Ok(())
        }
        None => bail!("object {objkey} has no stored history"),
    }
}

pub fn print_object_history(config: &Config, sitename: &str, objkey: &str) -> Result<()> {
    let storage = storage_for(config, sitename)?;

    let Some(row) = find_row(storage.as_ref(), objkey)? else {
        bail!("object {objkey} has no stored history");
    };

    for (slotkey, values) in row.slots_desc() {
        println!("Slot:\t{slotkey}");

        for (key, value) in values {
            match value.as_object() {
                Some(nested) => {
                    println!("   {key}:");
                    for (nested_key, nested_value) in nested {
                        println!("\t{nested_key}: {nested_value}");
                    }
                }
                None => println!("   {key}:\t{value}"),
            }
        }

        println!();
    }

    Ok(())
}

pub fn restore(config: &Config, filename: &Path, sitename: &str) -> Result<()> {
    let bytes = fs::read(filename).with_context(|| filename.display().to_string())?;
    let record = SnapshotRecord::from_bytes(&bytes)?;

    let kind = interval_kind(config)?;
    let registry = Registry::new(&config.type_specs()?)?;
    let site = site_for(config, sitename)?;
    let storage = storage_for(config, sitename)?;

    let slot = Slot::load_backup(record, &registry, kind)?;

    if slot.is_active(site.current_datetime()) {
        // The interval is still open: put the snapshot back as-is.
        storage.insert_cache_backup(&bytes)?;
    } else if !slot.store(&site, storage.as_ref()) {
        bail!("storing slot {} failed", slot.key());
    }

    Ok(())
}

pub fn restore_history(config: &Config, sitename: &str, filename: &Path) -> Result<()> {
    let storage = storage_for(config, sitename)?;
    let file = fs::File::open(filename).with_context(|| filename.display().to_string())?;

    let mut counter = Counter::new(None, 100, "restored rows: ");

    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let rows: std::collections::BTreeMap<String, std::collections::BTreeMap<String, Values>> =
            serde_json::from_str(&line).context("bad row line")?;

        for (objkey, slots) in rows {
            storage.mutate(&objkey, &slots, &[])?;
            counter.increment();
        }
    }

    counter.done();
    Ok(())
}

pub fn reset(config: &Config, sitename: &str) -> Result<()> {
    let kind = interval_kind(config)?;
    let site = site_for(config, sitename)?;
    let storage = storage_for(config, sitename)?;

    let empty = Slot::new(Interval::containing(kind, site.current_datetime()));
    let record = empty.make_backup(site.wall_datetime());

    storage.insert_cache_backup(&record.to_bytes()?)?;
    Ok(())
}

pub fn merge_history(config: &Config, sitename: &str, store: bool, dump: bool) -> Result<()> {
    let kind = interval_kind(config)?;
    let registry = Registry::new(&config.type_specs()?)?;
    let site = site_for(config, sitename)?;
    let storage = storage_for(config, sitename)?;

    let mut stdout = io::stdout();
    let dump_out: Option<&mut dyn Write> = if dump { Some(&mut stdout) } else { None };

    let stats = merge_rows(storage.as_ref(), &site, &registry, kind, store, dump_out)?;

    println!(
        "scanned={} supported={} merged={} failed={}",
        stats.scanned, stats.supported, stats.merged, stats.failed
    );
    Ok(())
}
