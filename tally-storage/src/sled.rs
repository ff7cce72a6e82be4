// tally-storage: sled-backed key/column driver
//
// One tree per site table. Item keys are `hashkey 0x1f rangekey`; column
// maps are stored as JSON objects (numbers stay native JSON numbers). The
// internal `_` hashkey prefix carries the snapshot item and availability
// markers and never surfaces from `iterate_rows`.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ::sled::{Db, IVec, Tree};
use chrono::TimeDelta;
use parking_lot::RwLock;
use serde_json::json;
use tracing::debug;

use tally_core::error::{StorageError, StorageResult};
use tally_core::eventlog::{self, objtype_of, ERROR_STORAGE};
use tally_core::model::Values;
use tally_core::storage::{
    Row, Storage, StoredBackup, AVAIL_MARKER_HASHKEY, CACHE_BACKUP_HASHKEY,
    CACHE_BACKUP_RANGEKEY, INTERNAL_KEY_PREFIX,
};

const KEY_SEPARATOR: u8 = 0x1f;
const BACKUP_TIME_RANGEKEY: &str = "backup_time";

pub struct SledStorage {
    site: String,
    table: String,
    db: Db,
    tree: RwLock<Option<Tree>>,
}

impl SledStorage {
    /// Site-scoped handle over a shared database.
    pub fn new(db: Db, site: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            table: table.into(),
            db,
            tree: RwLock::new(None),
        }
    }

    fn connect(&self) -> StorageResult<Tree> {
        if let Some(tree) = self.tree.read().clone() {
            return Ok(tree);
        }

        let tree = self
            .db
            .open_tree(self.table.as_bytes())
            .map_err(backend)?;
        *self.tree.write() = Some(tree.clone());
        Ok(tree)
    }

    fn put(&self, hashkey: &str, rangekey: &str, value: &[u8]) -> StorageResult<()> {
        self.connect()?
            .insert(item_key(hashkey, rangekey), value)
            .map(|_| ())
            .map_err(backend)
    }
}

impl Storage for SledStorage {
    fn site(&self) -> &str {
        &self.site
    }

    fn insert(&self, objkey: &str, slotkey: &str, values: &Values) -> StorageResult<()> {
        let encoded = encode_columns(values)?;

        let result = self.put(objkey, slotkey, &encoded);
        eventlog::with(|log| {
            let error = if result.is_ok() { 0 } else { ERROR_STORAGE };
            log.store(&self.site, error, encoded.len(), objtype_of(objkey));
        });
        result
    }

    fn insert_avail_marker(
        &self,
        slotkey: &str,
        stored: u64,
        errors: u64,
        downtime: TimeDelta,
    ) -> StorageResult<()> {
        let marker = json!({
            "stored": stored,
            "errors": errors,
            "downtime": downtime.num_seconds(),
        });
        let encoded = serde_json::to_vec(&marker).map_err(decode)?;

        self.put(AVAIL_MARKER_HASHKEY, slotkey, &encoded)
    }

    fn insert_cache_backup(&self, blob: &[u8]) -> StorageResult<()> {
        let result = (|| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs() as i64;

            self.put(CACHE_BACKUP_HASHKEY, CACHE_BACKUP_RANGEKEY, blob)?;
            self.put(
                CACHE_BACKUP_HASHKEY,
                BACKUP_TIME_RANGEKEY,
                &now.to_be_bytes(),
            )?;
            self.connect()?.flush().map(|_| ()).map_err(backend)
        })();

        eventlog::with(|log| {
            let error = if result.is_ok() { 0 } else { ERROR_STORAGE };
            log.cache_backup(&self.site, error, blob.len(), false);
        });
        result
    }

    fn get_cache_backup(&self) -> StorageResult<Option<StoredBackup>> {
        let tree = self.connect()?;

        let blob = match tree
            .get(item_key(CACHE_BACKUP_HASHKEY, CACHE_BACKUP_RANGEKEY))
            .map_err(backend)?
        {
            Some(blob) => blob.to_vec(),
            None => return Ok(None),
        };

        let mtime = tree
            .get(item_key(CACHE_BACKUP_HASHKEY, BACKUP_TIME_RANGEKEY))
            .map_err(backend)?
            .and_then(|raw| decode_timestamp(&raw))
            .unwrap_or(UNIX_EPOCH);

        Ok(Some(StoredBackup { blob, mtime }))
    }

    fn iterate_rows(
        &self,
    ) -> StorageResult<Box<dyn Iterator<Item = StorageResult<Row>> + Send + '_>> {
        let tree = self.connect()?;

        // sled iterates in key order, so items of one hashkey are adjacent.
        let mut rows: Vec<Row> = Vec::new();

        for item in tree.iter() {
            let (key, value) = item.map_err(backend)?;
            let Some((hashkey, rangekey)) = split_key(&key) else {
                continue;
            };
            if hashkey.starts_with(INTERNAL_KEY_PREFIX) {
                continue;
            }

            let columns = decode_columns(&value)?;

            let grouped = rows
                .last()
                .map(|row| row.objkey == hashkey)
                .unwrap_or(false);
            if !grouped {
                rows.push(Row::new(hashkey));
            }
            if let Some(row) = rows.last_mut() {
                row.slots.insert(rangekey, columns);
            }
        }

        debug!("site {} iterated {} rows", self.site, rows.len());
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn mutate(
        &self,
        objkey: &str,
        insert: &BTreeMap<String, Values>,
        remove: &[String],
    ) -> StorageResult<()> {
        let result = (|| {
            let tree = self.connect()?;
            let mut size = 0;

            for (slotkey, values) in insert {
                let encoded = encode_columns(values)?;
                size += encoded.len();
                tree.insert(item_key(objkey, slotkey), encoded)
                    .map_err(backend)?;
            }
            for slotkey in remove {
                tree.remove(item_key(objkey, slotkey)).map_err(backend)?;
            }
            Ok(size)
        })();

        eventlog::with(|log| {
            let (error, size) = match &result {
                Ok(size) => (0, *size),
                Err(_) => (ERROR_STORAGE, 0),
            };
            log.mutate(&self.site, error, size, objtype_of(objkey));
        });
        result.map(|_| ())
    }

    fn reset(&self) {
        *self.tree.write() = None;
    }
}

fn item_key(hashkey: &str, rangekey: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(hashkey.len() + 1 + rangekey.len());
    key.extend_from_slice(hashkey.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(rangekey.as_bytes());
    key
}

fn split_key(key: &IVec) -> Option<(String, String)> {
    let at = key.iter().position(|b| *b == KEY_SEPARATOR)?;
    let hashkey = String::from_utf8(key[..at].to_vec()).ok()?;
    let rangekey = String::from_utf8(key[at + 1..].to_vec()).ok()?;
    Some((hashkey, rangekey))
}

fn encode_columns(values: &Values) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(values).map_err(decode)
}

fn decode_columns(raw: &IVec) -> StorageResult<Values> {
    serde_json::from_slice(raw).map_err(decode)
}

fn decode_timestamp(raw: &IVec) -> Option<SystemTime> {
    let bytes: [u8; 8] = raw.as_ref().try_into().ok()?;
    let secs = i64::from_be_bytes(bytes);
    UNIX_EPOCH.checked_add(Duration::from_secs(secs.max(0) as u64))
}

fn backend(e: ::sled::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn decode(e: serde_json::Error) -> StorageError {
    StorageError::Decode(e.to_string())
}
