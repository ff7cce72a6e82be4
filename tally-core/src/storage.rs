// tally-core: Storage driver contract
//
// The engine requires exactly these operations from a key/column backend.
// Handles are site-scoped: one handle reads and writes one site's table.

use std::collections::BTreeMap;
use std::time::SystemTime;

use chrono::TimeDelta;

use crate::error::StorageResult;
use crate::model::Values;

/// Keys with this prefix are internal (snapshot blobs, availability
/// markers); `iterate_rows` skips them.
pub const INTERNAL_KEY_PREFIX: &str = "_";

/// Hash and range key of the single snapshot item per site.
pub const CACHE_BACKUP_HASHKEY: &str = "_cache";
pub const CACHE_BACKUP_RANGEKEY: &str = "backup";

/// Hash key of availability markers; the range key is the slot key.
pub const AVAIL_MARKER_HASHKEY: &str = "_avail";

/// A remotely stored snapshot blob and its write timestamp.
#[derive(Debug, Clone)]
pub struct StoredBackup {
    pub blob: Vec<u8>,
    pub mtime: SystemTime,
}

/// Read view of one stored object: all of its slots, keyed by slot key.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub objkey: String,
    pub slots: BTreeMap<String, Values>,
}

impl Row {
    pub fn new(objkey: impl Into<String>) -> Self {
        Self {
            objkey: objkey.into(),
            slots: BTreeMap::new(),
        }
    }

    /// Slot entries in descending key order, the order drivers return
    /// range keys in.
    pub fn slots_desc(&self) -> impl Iterator<Item = (&String, &Values)> {
        self.slots.iter().rev()
    }
}

/// Site-scoped key/column storage.
///
/// `insert` is overwrite-on-match: the engine may send the same
/// `(objkey, slotkey)` item more than once after retries.
pub trait Storage: Send + Sync {
    /// The site this handle belongs to.
    fn site(&self) -> &str;

    /// Store one item. Numeric column values pass through natively, other
    /// values JSON-encode.
    fn insert(&self, objkey: &str, slotkey: &str, values: &Values) -> StorageResult<()>;

    /// Store the availability/meta row of one closed interval.
    fn insert_avail_marker(
        &self,
        slotkey: &str,
        stored: u64,
        errors: u64,
        downtime: TimeDelta,
    ) -> StorageResult<()>;

    /// Store the snapshot blob under the well-known internal item.
    fn insert_cache_backup(&self, blob: &[u8]) -> StorageResult<()>;

    /// Fetch the snapshot blob and its write timestamp.
    fn get_cache_backup(&self) -> StorageResult<Option<StoredBackup>>;

    /// Enumerate all non-internal objects, grouped by object key, slots in
    /// descending key order within each group.
    fn iterate_rows(&self)
        -> StorageResult<Box<dyn Iterator<Item = StorageResult<Row>> + Send + '_>>;

    /// Insert and/or remove slot columns of one object.
    fn mutate(
        &self,
        objkey: &str,
        insert: &BTreeMap<String, Values>,
        remove: &[String],
    ) -> StorageResult<()>;

    /// Drop and recreate the underlying connection handle.
    fn reset(&self);
}
