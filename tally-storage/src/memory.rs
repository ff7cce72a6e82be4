// tally-storage: In-memory driver with failure injection

use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

use chrono::TimeDelta;
use parking_lot::Mutex;

use tally_core::error::{StorageError, StorageResult};
use tally_core::model::Values;
use tally_core::storage::{Row, Storage, StoredBackup, INTERNAL_KEY_PREFIX};

/// A recorded availability marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailMarker {
    pub slotkey: String,
    pub stored: u64,
    pub errors: u64,
    pub downtime_secs: i64,
}

#[derive(Default)]
struct MemState {
    items: BTreeMap<String, BTreeMap<String, Values>>,
    backup: Option<(Vec<u8>, SystemTime)>,
    markers: Vec<AvailMarker>,
    fail_backup_inserts: u32,
    fail_marker_inserts: u32,
    fail_objkeys: BTreeSet<String>,
    resets: u32,
}

/// In-memory storage for tests. Failure knobs make the next N backup or
/// marker inserts fail, or fail every insert for chosen object keys.
pub struct MemoryStorage {
    site: String,
    state: Mutex<MemState>,
}

impl MemoryStorage {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            state: Mutex::new(MemState::default()),
        }
    }

    pub fn fail_next_backup_inserts(&self, count: u32) {
        self.state.lock().fail_backup_inserts = count;
    }

    pub fn fail_next_marker_inserts(&self, count: u32) {
        self.state.lock().fail_marker_inserts = count;
    }

    pub fn fail_inserts_for(&self, objkey: impl Into<String>) {
        self.state.lock().fail_objkeys.insert(objkey.into());
    }

    /// Install a backup blob with an explicit write timestamp.
    pub fn set_backup(&self, blob: Vec<u8>, mtime: SystemTime) {
        self.state.lock().backup = Some((blob, mtime));
    }

    pub fn backup(&self) -> Option<(Vec<u8>, SystemTime)> {
        self.state.lock().backup.clone()
    }

    pub fn items(&self) -> BTreeMap<String, BTreeMap<String, Values>> {
        self.state.lock().items.clone()
    }

    pub fn values(&self, objkey: &str, slotkey: &str) -> Option<Values> {
        self.state
            .lock()
            .items
            .get(objkey)
            .and_then(|slots| slots.get(slotkey))
            .cloned()
    }

    pub fn markers(&self) -> Vec<AvailMarker> {
        self.state.lock().markers.clone()
    }

    pub fn resets(&self) -> u32 {
        self.state.lock().resets
    }
}

impl Storage for MemoryStorage {
    fn site(&self) -> &str {
        &self.site
    }

    fn insert(&self, objkey: &str, slotkey: &str, values: &Values) -> StorageResult<()> {
        let mut state = self.state.lock();

        if state.fail_objkeys.contains(objkey) {
            return Err(StorageError::Backend(format!("injected failure: {objkey}")));
        }

        state
            .items
            .entry(objkey.to_string())
            .or_default()
            .insert(slotkey.to_string(), values.clone());
        Ok(())
    }

    fn insert_avail_marker(
        &self,
        slotkey: &str,
        stored: u64,
        errors: u64,
        downtime: TimeDelta,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();

        if state.fail_marker_inserts > 0 {
            state.fail_marker_inserts -= 1;
            return Err(StorageError::Unavailable("injected marker failure".to_string()));
        }

        state.markers.push(AvailMarker {
            slotkey: slotkey.to_string(),
            stored,
            errors,
            downtime_secs: downtime.num_seconds(),
        });
        Ok(())
    }

    fn insert_cache_backup(&self, blob: &[u8]) -> StorageResult<()> {
        let mut state = self.state.lock();

        if state.fail_backup_inserts > 0 {
            state.fail_backup_inserts -= 1;
            return Err(StorageError::Unavailable("injected backup failure".to_string()));
        }

        state.backup = Some((blob.to_vec(), SystemTime::now()));
        Ok(())
    }

    fn get_cache_backup(&self) -> StorageResult<Option<StoredBackup>> {
        Ok(self
            .state
            .lock()
            .backup
            .clone()
            .map(|(blob, mtime)| StoredBackup { blob, mtime }))
    }

    fn iterate_rows(
        &self,
    ) -> StorageResult<Box<dyn Iterator<Item = StorageResult<Row>> + Send + '_>> {
        let rows: Vec<Row> = self
            .state
            .lock()
            .items
            .iter()
            .filter(|(objkey, _)| !objkey.starts_with(INTERNAL_KEY_PREFIX))
            .map(|(objkey, slots)| Row {
                objkey: objkey.clone(),
                slots: slots.clone(),
            })
            .collect();

        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn mutate(
        &self,
        objkey: &str,
        insert: &BTreeMap<String, Values>,
        remove: &[String],
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let slots = state.items.entry(objkey.to_string()).or_default();

        for (slotkey, values) in insert {
            slots.insert(slotkey.clone(), values.clone());
        }
        for slotkey in remove {
            slots.remove(slotkey);
        }
        Ok(())
    }

    fn reset(&self) {
        self.state.lock().resets += 1;
    }
}
