// tally-core: Snapshot, restore and fallback scenarios

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde_json::json;

use tally_config::{Config, SiteSpec};
use tally_core::backup::{self, SnapshotRecord, BACKUP_VERSION};
use tally_core::cache::Cache;
use tally_core::counters::Counters;
use tally_core::error::{BackupError, CacheError};
use tally_core::interval::{Interval, IntervalKind};
use tally_core::registry::Registry;
use tally_core::site::{Clock, Site};
use tally_core::slot::Slot;
use tally_core::storage::Storage;
use tally_storage::MemoryStorage;

fn test_config(dir: &std::path::Path) -> Config {
    let text = format!(
        r#"
        [backup]
        interval = 60
        local_cache_format = "{0}/{{site}}.snapshot"
        local_history_format = "{0}/{{site}}-{{slot}}.history"

        [interval]
        module = "day"

        [site]
        s = "0"

        [type]
        counters = "c counters"
        "#,
        dir.display()
    );
    Config::from_toml(&text).unwrap()
}

fn at(date: (i32, u32, u32), time: (u32, u32, u32)) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(date.0, date.1, date.2)
        .unwrap()
        .and_hms_opt(time.0, time.1, time.2)
        .unwrap()
}

fn registry() -> Registry {
    let config = Config::from_toml(
        r#"
        [type]
        counters = "c counters"
        "#,
    )
    .unwrap();
    Registry::new(&config.type_specs().unwrap()).unwrap()
}

fn site_at(now: NaiveDateTime) -> Site {
    let spec = SiteSpec {
        name: "s".to_string(),
        offset_hours: 0,
        table: None,
    };
    Site::with_clock(&spec, Clock::fixed(now))
}

fn open_cache(
    config: &Config,
    storage: &Arc<MemoryStorage>,
    now: NaiveDateTime,
) -> Cache {
    let mut storages: BTreeMap<String, Arc<dyn Storage>> = BTreeMap::new();
    storages.insert("s".to_string(), storage.clone());
    Cache::open(config, &registry(), storages, Clock::fixed(now)).unwrap()
}

#[test]
fn snapshot_restores_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let storage = Arc::new(MemoryStorage::new("s"));
    let objkeys = vec!["c_x".to_string(), "c_y".to_string()];

    let before = at((2024, 5, 10), (10, 0, 0));
    let cache = open_cache(&config, &storage, before);
    for _ in 0..5 {
        cache.add("s", &objkeys, r#"{"hits": 1}"#, &Counters).unwrap();
    }
    cache.flush(false, true);
    drop(cache);

    // New process two hours later, same storage.
    let after = at((2024, 5, 10), (12, 0, 0));
    let restarted = open_cache(&config, &storage, after);

    let doc: serde_json::Value =
        serde_json::from_str(&restarted.get("s", &objkeys).unwrap()).unwrap();
    assert_eq!(
        doc,
        json!({"20240510": {"c_x": {"hits": 5}, "c_y": {"hits": 5}}})
    );

    // The restored slot charges the blind window as downtime.
    let (blob, _) = storage.backup().unwrap();
    let record = SnapshotRecord::from_bytes(&blob).unwrap();
    let mut slot = Slot::load_backup(record, &registry(), IntervalKind::Day).unwrap();
    let site = site_at(after);
    slot.init(&site, after);
    assert!(slot.downtime() >= TimeDelta::hours(2));
}

#[test]
fn snapshot_round_trips_current_version() {
    let now = at((2024, 5, 10), (9, 30, 0));
    let mut slot = Slot::new(Interval::containing(IntervalKind::Day, now));
    let objkeys = vec!["c_x".to_string()];
    slot.add(&objkeys, &json!({"hits": 7}), &Counters, now).unwrap();

    let record = slot.make_backup(now);
    assert_eq!(record.version, BACKUP_VERSION);

    let bytes = record.to_bytes().unwrap();
    let loaded =
        Slot::load_backup(SnapshotRecord::from_bytes(&bytes).unwrap(), &registry(), IntervalKind::Day)
            .unwrap();

    assert_eq!(loaded.interval(), slot.interval());
    let mut seen = Vec::new();
    loaded.get(&objkeys, &mut |slotkey, objkey, values| {
        seen.push((slotkey.to_string(), objkey.to_string(), values));
    });
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "20240510");
    assert_eq!(seen[0].2.get("hits"), Some(&json!(7)));
}

#[test]
fn version_one_record_restores_to_day_interval() {
    let bytes = br#"{"version": 1, "date": "2024-03-05", "cachedata": {"c_x": {"hits": 4}}}"#;
    let record = SnapshotRecord::from_bytes(bytes).unwrap();

    let slot = Slot::load_backup(record, &registry(), IntervalKind::Day).unwrap();

    assert_eq!(slot.key(), "20240305");
    assert_eq!(slot.downtime(), TimeDelta::zero());
    assert_eq!(slot.len(), 1);
}

#[test]
fn unsupported_version_is_rejected() {
    let bytes = br#"{"version": 9, "cachedata": {}}"#;
    let record = SnapshotRecord::from_bytes(bytes).unwrap();

    assert!(matches!(
        Slot::load_backup(record, &registry(), IntervalKind::Day),
        Err(CacheError::Backup(BackupError::UnsupportedVersion(9)))
    ));
}

#[test]
fn staleness_downtime_is_clamped() {
    let interval_start = at((2024, 5, 10), (0, 0, 0));
    let record = SnapshotRecord {
        version: BACKUP_VERSION,
        date: None,
        interval_start: Some(interval_start),
        cachedata: BTreeMap::new(),
        downtime: Some(10),
        snapshot_end: Some(at((2024, 5, 10), (8, 0, 0))),
    };

    // Restored before the snapshot was even taken: the charge clamps to
    // zero and only the recorded downtime remains.
    let now = at((2024, 5, 10), (7, 0, 0));
    let mut slot =
        Slot::load_backup(record.clone(), &registry(), IntervalKind::Day).unwrap();
    slot.init(&site_at(now), now);
    assert_eq!(slot.downtime(), TimeDelta::seconds(10));

    // Restored after the interval ended: the charge stops at the interval
    // end.
    let later = at((2024, 5, 12), (3, 0, 0));
    let mut slot = Slot::load_backup(record, &registry(), IntervalKind::Day).unwrap();
    slot.init(&site_at(later), later);
    assert_eq!(
        slot.downtime(),
        TimeDelta::seconds(10) + TimeDelta::hours(16)
    );
}

#[test]
fn failed_remote_dump_falls_back_to_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let storage = Arc::new(MemoryStorage::new("s"));
    let objkeys = vec!["c_x".to_string()];
    let local_path = dir.path().join("s.snapshot");

    let cache = open_cache(&config, &storage, at((2024, 5, 10), (10, 0, 0)));
    cache.add("s", &objkeys, r#"{"hits": 2}"#, &Counters).unwrap();

    storage.fail_next_backup_inserts(1);
    cache.flush(false, true);

    assert!(local_path.exists());
    assert!(storage.backup().is_none());

    // Next dump succeeds remotely and cleans the local file up.
    cache.flush(false, true);
    assert!(!local_path.exists());
    assert!(storage.backup().is_some());
}

#[test]
fn newest_backup_wins_on_restore() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let storage = Arc::new(MemoryStorage::new("s"));
    let local_path = dir.path().join("s.snapshot");
    let now = at((2024, 5, 10), (10, 0, 0));
    let interval = Interval::containing(IntervalKind::Day, now);

    let record_with = |hits: i64| {
        let mut slot = Slot::new(interval.clone());
        slot.add(
            &["c_x".to_string()],
            &json!({"hits": hits}),
            &Counters,
            now,
        )
        .unwrap();
        slot.make_backup(now).to_bytes().unwrap()
    };

    // Remote written long ago, local file just now: local wins.
    storage.set_backup(record_with(1), UNIX_EPOCH + Duration::from_secs(1_000));
    backup::write_atomic(&local_path, &record_with(2), ".tmp").unwrap();

    let cache = open_cache(&config, &storage, now);
    let doc: serde_json::Value = serde_json::from_str(
        &cache.get("s", &["c_x".to_string()]).unwrap(),
    )
    .unwrap();
    assert_eq!(doc["20240510"]["c_x"], json!({"hits": 2}));
}

#[test]
fn startup_without_parent_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.backup.local_cache_format =
        format!("{}/missing/{{site}}.snapshot", dir.path().display());

    let storage = Arc::new(MemoryStorage::new("s"));
    let mut storages: BTreeMap<String, Arc<dyn Storage>> = BTreeMap::new();
    storages.insert("s".to_string(), storage);

    let result = Cache::open(
        &config,
        &registry(),
        storages,
        Clock::fixed(at((2024, 5, 10), (10, 0, 0))),
    );
    assert!(matches!(result, Err(CacheError::NoDirectory(_))));
}
