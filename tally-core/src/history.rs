// tally-core: Queue of closed slots awaiting storage

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::backup::{self, history_backup_path};
use crate::error::{CacheError, CacheResult};
use crate::eventlog::{self, ERROR_OTHER};
use crate::model::Values;
use crate::site::Site;
use crate::slot::Slot;
use crate::storage::Storage;

pub struct History {
    site: Site,
    local_backup_format: String,
    slots: Mutex<Vec<Slot>>,
}

impl History {
    pub fn new(site: Site, local_history_format: &str) -> CacheResult<Self> {
        backup::check_dirname(std::path::Path::new(local_history_format))?;

        Ok(Self {
            site,
            local_backup_format: local_history_format.to_string(),
            slots: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue a rotated slot, FIFO.
    pub fn append(&self, slot: Slot) {
        self.slots.lock().push(slot);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn get(&self, objkeys: &[String], callback: &mut dyn FnMut(&str, &str, Values)) {
        let slots = self.slots.lock();
        for slot in slots.iter() {
            slot.get(objkeys, callback);
        }
    }

    /// Store the queued slots and drop them from the queue.
    ///
    /// The queue is snapshotted under the lock and written off it; slots
    /// appended while the writer runs stay queued for the next flush. A slot
    /// whose store fails is written to a local history file instead and is
    /// removed from the queue all the same; the local file is the recovery
    /// channel.
    pub fn store(&self, storage: &Arc<dyn Storage>) -> CacheResult<()> {
        storage.reset();

        let batch: Vec<Slot> = {
            let slots = self.slots.lock();
            if slots.is_empty() {
                return Ok(());
            }
            slots.iter().cloned().collect()
        };
        let count = batch.len();

        let writer_storage = Arc::clone(storage);
        let site = self.site.clone();
        let format = self.local_backup_format.clone();

        let writer = thread::Builder::new()
            .name("history-writer".to_string())
            .spawn(move || {
                for slot in &batch {
                    if !slot.store(&site, writer_storage.as_ref()) {
                        dump_local_backup(&site, &format, slot);
                    }
                }
            })
            .map_err(CacheError::Io)?;

        if writer.join().is_err() {
            return Err(CacheError::Writer("history writer panicked".to_string()));
        }

        let mut slots = self.slots.lock();
        slots.drain(..count);
        debug!("site {} history stored {} slots", self.site, count);

        Ok(())
    }
}

/// Write one slot to its local history file (`.partial` then rename).
/// Contained: the store already failed, this is the recovery path.
fn dump_local_backup(site: &Site, format: &str, slot: &Slot) {
    let record = slot.make_backup(site.wall_datetime());
    let path = history_backup_path(format, site.name(), &slot.key());

    let bytes = match record.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("local history backup encoding failed: {}", e);
            eventlog::with(|log| log.store_local_backup(site.name(), ERROR_OTHER, ""));
            return;
        }
    };

    match backup::write_atomic(&path, &bytes, ".partial") {
        Ok(()) => {
            info!("local history backup: {}", path.display());
            eventlog::with(|log| {
                log.store_local_backup(site.name(), 0, &path.display().to_string())
            });
        }
        Err(e) => {
            error!("local history backup dumping failed: {}", e);
            eventlog::with(|log| log.store_local_backup(site.name(), ERROR_OTHER, ""));
        }
    }
}
