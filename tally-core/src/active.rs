// tally-core: The open slot of one site
//
// Owns rotation and the snapshot/restore protocol. All public methods take
// the per-site mutex for their full duration; the snapshot write itself runs
// on a detached writer with the record already captured, so add traffic only
// pauses for the capture.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::backup::{self, LocalBackup};
use crate::error::{CacheError, CacheResult, ModelError};
use crate::eventlog::{self, ERROR_OTHER};
use crate::interval::IntervalKind;
use crate::model::{Model, Values};
use crate::registry::Registry;
use crate::site::Site;
use crate::slot::Slot;
use crate::storage::Storage;

pub struct Active {
    site: Site,
    kind: IntervalKind,
    local_backup_path: PathBuf,
    state: Mutex<State>,
}

struct State {
    slot: Slot,
    modified: bool,
}

impl Active {
    /// Restore the open slot from the newest available snapshot, or start
    /// cold when none exists.
    pub fn open(
        site: Site,
        kind: IntervalKind,
        local_cache_format: &str,
        registry: &Registry,
        storage: &dyn Storage,
    ) -> CacheResult<Self> {
        let local_backup_path = backup::cache_backup_path(local_cache_format, site.name());
        backup::check_dirname(&local_backup_path)?;

        let slot = Self::load_backup(&site, kind, &local_backup_path, registry, storage)?;

        Ok(Self {
            site,
            kind,
            local_backup_path,
            state: Mutex::new(State {
                slot,
                modified: false,
            }),
        })
    }

    fn load_backup(
        site: &Site,
        kind: IntervalKind,
        local_backup_path: &std::path::Path,
        registry: &Registry,
        storage: &dyn Storage,
    ) -> CacheResult<Slot> {
        debug!("loading site {} cache backup", site);
        let load_start = Instant::now();

        let stored = storage.get_cache_backup()?;
        if stored.is_none() {
            warn!("site {} cache backup not found from storage", site);
        }

        let local = backup::read_local_backup(local_backup_path)?;
        if local.is_some() {
            warn!("site {} local cache backup file found", site);
        }

        let chosen: Option<LocalBackup> = match (stored, local) {
            (Some(stored), Some(local)) => {
                if stored.mtime < local.mtime {
                    debug!("local cache backup file is newest");
                    Some(local)
                } else {
                    // Remote should never outlive the local file; a leftover
                    // local copy means a cleanup failed.
                    warn!("cache backup in storage is newest");
                    Some(LocalBackup {
                        bytes: stored.blob,
                        mtime: stored.mtime,
                    })
                }
            }
            (Some(stored), None) => Some(LocalBackup {
                bytes: stored.blob,
                mtime: stored.mtime,
            }),
            (None, local) => local,
        };

        let mut slot = match chosen {
            Some(found) => {
                let record = backup::SnapshotRecord::from_bytes(&found.bytes)?;
                Slot::load_backup(record, registry, kind)?
            }
            None => Slot::cold(kind, site.current_datetime()),
        };

        slot.init(site, site.wall_datetime());

        info!(
            "site {} cache backup load time {} s",
            site,
            load_start.elapsed().as_secs()
        );

        Ok(slot)
    }

    /// Accumulate, rotating first when the open interval has expired. The
    /// closed slot (if any) is returned alongside the accumulation result so
    /// a model failure cannot drop it.
    pub fn add(
        &self,
        objkeys: &[String],
        params: &Value,
        model: &dyn Model,
    ) -> (Option<Slot>, Result<(), ModelError>) {
        let mut state = self.state.lock();

        let now = self.site.current_datetime();
        let closed = self.rotate_locked(&mut state, now, false);

        let result = state.slot.add(objkeys, params, model, now);
        state.modified = true;

        (closed, result)
    }

    pub fn get(&self, objkeys: &[String], callback: &mut dyn FnMut(&str, &str, Values)) {
        let state = self.state.lock();
        state.slot.get(objkeys, callback);
    }

    /// Rotate if the open interval has expired, or unconditionally when
    /// `force` is set.
    pub fn rotate(&self, force: bool) -> Option<Slot> {
        let mut state = self.state.lock();
        let now = self.site.current_datetime();
        self.rotate_locked(&mut state, now, force)
    }

    fn rotate_locked(&self, state: &mut State, now: NaiveDateTime, force: bool) -> Option<Slot> {
        let active = state.slot.is_active(now);

        if active && !force {
            return None;
        }

        let next = if active {
            debug!("cloning active site {} cache {}", self.site, state.slot.key());
            state.slot.clone()
        } else {
            state.modified = true;
            Slot::new(crate::interval::Interval::containing(self.kind, now))
        };

        let closed = std::mem::replace(&mut state.slot, next);
        debug!("rotating site {} cache {}", self.site, closed.key());
        Some(closed)
    }

    /// Snapshot the open slot to storage, falling back to the local file.
    ///
    /// No-op unless the slot was modified since the last successful dump or
    /// `force` is set. On any failure `modified` is restored so the next
    /// flush retries.
    pub fn dump_backup(&self, storage: &Arc<dyn Storage>, force: bool) -> CacheResult<()> {
        {
            let state = self.state.lock();
            if !force && !state.modified {
                debug!("site {} cache not modified since last dump", self.site);
                return Ok(());
            }
        }

        debug!("dumping site {} cache backup", self.site);
        let dump_start = Instant::now();

        storage.reset();

        // Capture under the lock; write off it. The writer owns a stable
        // copy, so add traffic resumes as soon as the capture is done.
        let bytes = {
            let mut state = self.state.lock();
            let snapshot_end = self.site.wall_datetime();
            let record = state.slot.make_backup(snapshot_end);
            let bytes = record.to_bytes()?;
            state.modified = false;
            bytes
        };

        let writer_storage = Arc::clone(storage);
        let path = self.local_backup_path.clone();
        let sitename = self.site.name().to_string();

        let writer = thread::Builder::new()
            .name("backup-writer".to_string())
            .spawn(move || -> CacheResult<()> {
                match writer_storage.insert_cache_backup(&bytes) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        dump_local_backup(&sitename, &path, &bytes);
                        Err(e.into())
                    }
                }
            })
            .map_err(CacheError::Io)?;

        let outcome = match writer.join() {
            Ok(result) => result,
            Err(_) => Err(CacheError::Writer("backup writer panicked".to_string())),
        };

        match outcome {
            Ok(()) => {
                let _ = fs::remove_file(&self.local_backup_path);
                info!(
                    "site {} cache backup dump time {} s",
                    self.site,
                    dump_start.elapsed().as_secs()
                );
                Ok(())
            }
            Err(e) => {
                error!("site {} cache backup failed: {}", self.site, e);
                self.state.lock().modified = true;
                Err(e)
            }
        }
    }

}

/// Write the snapshot to the local fallback file, atomically. Errors are
/// contained; the caller already has a failure to report.
fn dump_local_backup(site: &str, path: &std::path::Path, bytes: &[u8]) {
    match backup::write_atomic(path, bytes, ".tmp") {
        Ok(()) => {
            info!("local cache backup: {}", path.display());
            eventlog::with(|log| log.cache_backup(site, 0, bytes.len(), true));
        }
        Err(e) => {
            error!("local cache backup dumping failed: {}", e);
            eventlog::with(|log| log.cache_backup(site, ERROR_OTHER, 0, true));
        }
    }
}
