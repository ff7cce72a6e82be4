// tally-storage: sled driver contract tests

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::TimeDelta;
use serde_json::json;

use tally_core::model::Values;
use tally_core::storage::Storage;
use tally_storage::SledStorage;

fn values(hits: i64) -> Values {
    json!({"hits": hits}).as_object().unwrap().clone()
}

fn open(dir: &std::path::Path) -> (sled::Db, SledStorage) {
    let db = sled::open(dir.join("store")).unwrap();
    let storage = SledStorage::new(db.clone(), "s", "s_table");
    (db, storage)
}

#[test]
fn inserts_round_trip_through_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, storage) = open(dir.path());

    storage.insert("c_a", "20240101", &values(1)).unwrap();
    storage.insert("c_a", "20240102", &values(2)).unwrap();
    storage.insert("c_b", "20240101", &values(3)).unwrap();

    let rows: Vec<_> = storage
        .iterate_rows()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].objkey, "c_a");
    assert_eq!(rows[0].slots.len(), 2);
    assert_eq!(rows[0].slots.get("20240102"), Some(&values(2)));
    assert_eq!(rows[1].objkey, "c_b");

    // Range keys surface newest first.
    let keys: Vec<&String> = rows[0].slots_desc().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["20240102", "20240101"]);
}

#[test]
fn insert_overwrites_on_match() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, storage) = open(dir.path());

    storage.insert("c_a", "20240101", &values(1)).unwrap();
    storage.insert("c_a", "20240101", &values(9)).unwrap();

    let rows: Vec<_> = storage
        .iterate_rows()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows[0].slots.get("20240101"), Some(&values(9)));
}

#[test]
fn internal_keys_are_hidden_from_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, storage) = open(dir.path());

    storage.insert("c_a", "20240101", &values(1)).unwrap();
    storage.insert_cache_backup(b"blob").unwrap();
    storage
        .insert_avail_marker("20240101", 10, 2, TimeDelta::seconds(30))
        .unwrap();

    let rows: Vec<_> = storage
        .iterate_rows()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].objkey, "c_a");
}

#[test]
fn cache_backup_round_trips_with_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, storage) = open(dir.path());

    assert!(storage.get_cache_backup().unwrap().is_none());

    let before = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    storage.insert_cache_backup(b"snapshot bytes").unwrap();

    let backup = storage.get_cache_backup().unwrap().unwrap();
    assert_eq!(backup.blob, b"snapshot bytes");

    let mtime = backup.mtime.duration_since(UNIX_EPOCH).unwrap().as_secs();
    assert!(mtime >= before);
}

#[test]
fn mutate_inserts_and_removes_columns() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, storage) = open(dir.path());

    storage.insert("c_a", "20240101", &values(1)).unwrap();
    storage.insert("c_a", "20240102", &values(1)).unwrap();

    let mut insert = BTreeMap::new();
    insert.insert("20240101_2".to_string(), values(2));
    storage
        .mutate(
            "c_a",
            &insert,
            &["20240101".to_string(), "20240102".to_string()],
        )
        .unwrap();

    let rows: Vec<_> = storage
        .iterate_rows()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let slots: Vec<&String> = rows[0].slots.keys().collect();
    assert_eq!(slots, vec!["20240101_2"]);
}

#[test]
fn reset_survives_and_reconnects() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, storage) = open(dir.path());

    storage.insert("c_a", "20240101", &values(1)).unwrap();
    storage.reset();
    storage.insert("c_a", "20240102", &values(2)).unwrap();

    let rows: Vec<_> = storage
        .iterate_rows()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows[0].slots.len(), 2);
}

#[test]
fn site_handles_share_one_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path().join("store")).unwrap();

    let first = SledStorage::new(db.clone(), "a", "table_a");
    let second = SledStorage::new(db.clone(), "b", "table_b");

    first.insert("c_x", "20240101", &values(1)).unwrap();
    second.insert("c_x", "20240101", &values(2)).unwrap();

    let rows: Vec<_> = first
        .iterate_rows()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].slots.get("20240101"), Some(&values(1)));
}
