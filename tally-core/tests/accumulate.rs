// tally-core: Accumulation and rotation scenarios

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde_json::{json, Value};

use tally_config::Config;
use tally_core::cache::Cache;
use tally_core::counters::Counters;
use tally_core::error::CacheError;
use tally_core::interval::{Interval, IntervalKind};
use tally_core::registry::Registry;
use tally_core::site::{Clock, ManualClock};
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
        counters = "c counters days-months"
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

struct Fixture {
    cache: Cache,
    storage: Arc<MemoryStorage>,
    clock: ManualClock,
    _dir: tempfile::TempDir,
}

fn fixture(start: NaiveDateTime) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let registry = Registry::new(&config.type_specs().unwrap()).unwrap();

    let storage = Arc::new(MemoryStorage::new("s"));
    let mut storages: BTreeMap<String, Arc<dyn Storage>> = BTreeMap::new();
    storages.insert("s".to_string(), storage.clone());

    let (clock, handle) = Clock::manual(start);
    let cache = Cache::open(&config, &registry, storages, clock).unwrap();

    Fixture {
        cache,
        storage,
        clock: handle,
        _dir: dir,
    }
}

fn document(cache: &Cache, objkeys: &[&str]) -> Value {
    let objkeys: Vec<String> = objkeys.iter().map(|s| s.to_string()).collect();
    let text = cache.get("s", &objkeys).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn day_rotation_splits_slots() {
    let fx = fixture(at((2024, 1, 1), (23, 59, 50)));
    let objkeys = vec!["c_x".to_string()];

    fx.cache.add("s", &objkeys, r#"{"hits": 3}"#, &Counters).unwrap();

    fx.clock.advance(TimeDelta::seconds(20));
    fx.cache.add("s", &objkeys, r#"{"hits": 2}"#, &Counters).unwrap();

    let sitecache = fx.cache.sitecache("s").unwrap();
    assert_eq!(sitecache.history().len(), 1);

    assert_eq!(
        document(&fx.cache, &["c_x"]),
        json!({
            "20240101": {"c_x": {"hits": 3}},
            "20240102": {"c_x": {"hits": 2}},
        })
    );
}

#[test]
fn get_returns_union_of_history_and_active() {
    let fx = fixture(at((2024, 3, 1), (12, 0, 0)));
    let objkeys = vec!["c_x".to_string(), "c_y".to_string()];

    fx.cache.add("s", &objkeys, r#"{"n": 1}"#, &Counters).unwrap();

    fx.clock.advance(TimeDelta::days(1));
    fx.cache
        .add("s", &objkeys[..1].to_vec(), r#"{"n": 5}"#, &Counters)
        .unwrap();

    let doc = document(&fx.cache, &["c_x", "c_y"]);
    let slots: Vec<&String> = doc.as_object().unwrap().keys().collect();
    assert_eq!(slots, vec!["20240301", "20240302"]);

    assert_eq!(doc["20240301"]["c_y"], json!({"n": 1}));
    assert_eq!(doc["20240302"]["c_x"], json!({"n": 5}));
    assert!(doc["20240302"].get("c_y").is_none());
}

#[test]
fn active_overrides_coincident_history_entry() {
    let fx = fixture(at((2024, 3, 1), (12, 0, 0)));
    let objkeys = vec!["c_x".to_string()];

    fx.cache.add("s", &objkeys, r#"{"n": 1}"#, &Counters).unwrap();

    // Plant a history slot with the same slot key but stale values.
    let mut stale = Slot::new(Interval::containing(
        IntervalKind::Day,
        at((2024, 3, 1), (0, 0, 0)),
    ));
    stale
        .add(&objkeys, &json!({"n": 100}), &Counters, at((2024, 3, 1), (1, 0, 0)))
        .unwrap();

    let sitecache = fx.cache.sitecache("s").unwrap();
    sitecache.history().append(stale);

    assert_eq!(
        document(&fx.cache, &["c_x"]),
        json!({"20240301": {"c_x": {"n": 1}}})
    );
}

#[test]
fn malformed_payload_is_contained() {
    let fx = fixture(at((2024, 3, 1), (12, 0, 0)));
    let objkeys = vec!["c_x".to_string()];

    let result = fx.cache.add("s", &objkeys, "{not json", &Counters);
    assert!(matches!(result, Err(CacheError::Decode(_))));

    let result = fx.cache.add("s", &objkeys, r#""scalar""#, &Counters);
    assert!(matches!(result, Err(CacheError::Decode(_))));

    // The stream keeps flowing afterwards.
    fx.cache.add("s", &objkeys, r#"{"hits": 1}"#, &Counters).unwrap();
    assert_eq!(
        document(&fx.cache, &["c_x"]),
        json!({"20240301": {"c_x": {"hits": 1}}})
    );
}

#[test]
fn unknown_site_is_rejected() {
    let fx = fixture(at((2024, 3, 1), (12, 0, 0)));
    let objkeys = vec!["c_x".to_string()];

    assert!(matches!(
        fx.cache.add("nope", &objkeys, r#"{"n": 1}"#, &Counters),
        Err(CacheError::UnknownSite(_))
    ));
    assert!(fx.cache.get("nope", &objkeys).is_err());
}

#[test]
fn hour_granularity_rotates_hourly() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.interval.module = "hour".to_string();

    let storage = Arc::new(MemoryStorage::new("s"));
    let mut storages: BTreeMap<String, Arc<dyn Storage>> = BTreeMap::new();
    storages.insert("s".to_string(), storage.clone());

    let registry = Registry::new(&config.type_specs().unwrap()).unwrap();
    let (clock, handle) = Clock::manual(at((2024, 3, 1), (13, 59, 0)));
    let cache = Cache::open(&config, &registry, storages, clock).unwrap();

    let objkeys = vec!["c_x".to_string()];
    cache.add("s", &objkeys, r#"{"hits": 1}"#, &Counters).unwrap();
    handle.advance(TimeDelta::minutes(2));
    cache.add("s", &objkeys, r#"{"hits": 1}"#, &Counters).unwrap();

    assert_eq!(
        document(&cache, &["c_x"]),
        json!({
            "2024030113": {"c_x": {"hits": 1}},
            "2024030114": {"c_x": {"hits": 1}},
        })
    );
}

#[test]
fn flush_stores_rotated_slot() {
    let fx = fixture(at((2024, 1, 1), (23, 59, 50)));
    let objkeys = vec!["c_x".to_string()];

    fx.cache.add("s", &objkeys, r#"{"hits": 3}"#, &Counters).unwrap();
    fx.clock.advance(TimeDelta::seconds(20));

    fx.cache.flush(false, false);

    let values = fx.storage.values("c_x", "20240101").unwrap();
    assert_eq!(values.get("hits"), Some(&json!(3)));

    let sitecache = fx.cache.sitecache("s").unwrap();
    assert!(sitecache.history().is_empty());

    let markers = fx.storage.markers();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].slotkey, "20240101");
    assert_eq!(markers[0].stored, 1);
    assert_eq!(markers[0].errors, 0);
}
