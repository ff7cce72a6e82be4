// tally-core: One interval's accumulated model state

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::backup::{SnapshotRecord, BACKUP_VERSION};
use crate::error::{BackupError, CacheResult, ModelError};
use crate::interval::{Interval, IntervalKind};
use crate::model::{CacheModel, Model, Values};
use crate::registry::Registry;
use crate::site::Site;
use crate::storage::Storage;

/// Attempts and spacing of the availability-marker insert.
const MARKER_ATTEMPTS: u32 = 10;
const MARKER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Downtime charged at `init` time, installed by snapshot restore or by a
/// cold start.
enum DowntimeHook {
    /// The slot was restored from a snapshot captured at this instant; the
    /// time since then was not captured.
    SinceSnapshot(NaiveDateTime),
    /// The slot was created with no snapshot at all; whatever part of the
    /// interval has already elapsed was not captured.
    SinceStart,
}

/// The per-object model state of one interval, plus the downtime accounted
/// against that interval.
pub struct Slot {
    interval: Interval,
    downtime: TimeDelta,
    cachedata: BTreeMap<String, Box<dyn CacheModel>>,
    hook: Option<DowntimeHook>,
}

impl Slot {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            downtime: TimeDelta::zero(),
            cachedata: BTreeMap::new(),
            hook: None,
        }
    }

    fn with_hook(interval: Interval, hook: DowntimeHook) -> Self {
        let mut slot = Self::new(interval);
        slot.hook = Some(hook);
        slot
    }

    /// Empty slot for the interval containing `now`, charging the already
    /// elapsed part of the interval as downtime on `init`.
    pub fn cold(kind: IntervalKind, now: NaiveDateTime) -> Self {
        Self::with_hook(Interval::containing(kind, now), DowntimeHook::SinceStart)
    }

    pub fn interval(&self) -> &Interval {
        &self.interval
    }

    pub fn key(&self) -> String {
        self.interval.key()
    }

    pub fn downtime(&self) -> TimeDelta {
        self.downtime
    }

    pub fn len(&self) -> usize {
        self.cachedata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cachedata.is_empty()
    }

    /// Settle the downtime hook. Called once after construction or restore;
    /// `now` is the wall clock, without the site offset.
    pub fn init(&mut self, site: &Site, now: NaiveDateTime) {
        let Some(hook) = self.hook.take() else {
            return;
        };

        let charge = match hook {
            DowntimeHook::SinceSnapshot(snapshot_end) => {
                let horizon = (self.interval.end() - site.offset()).min(now);
                horizon - snapshot_end
            }
            DowntimeHook::SinceStart => {
                let local = now + site.offset();
                if local < self.interval.end() {
                    local - self.interval.start()
                } else {
                    self.interval.delta()
                }
            }
        };

        let charge = charge.max(TimeDelta::zero());
        if charge > TimeDelta::zero() {
            debug!(
                "site {} slot {} charging {} s downtime",
                site,
                self.key(),
                charge.num_seconds()
            );
        }
        self.downtime += charge;
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.interval.contains(now)
    }

    /// Fold one parameter value into every listed object's model state.
    /// Failing objects are skipped; the first failure is reported after the
    /// rest of the batch has been applied.
    pub fn add(
        &mut self,
        objkeys: &[String],
        params: &Value,
        model: &dyn Model,
        now: NaiveDateTime,
    ) -> Result<(), ModelError> {
        let offset = (now - self.interval.start()).max(TimeDelta::zero());
        let mut first_error = None;

        for objkey in objkeys {
            let modeldata = self
                .cachedata
                .entry(objkey.clone())
                .or_insert_with(|| model.new_cache());

            let result = if modeldata.model_id() == model.id() {
                modeldata.add(params, offset)
            } else {
                Err(ModelError::TypeMismatch {
                    objkey: objkey.clone(),
                    expected: model.id().to_string(),
                    actual: modeldata.model_id().to_string(),
                })
            };

            if let Err(e) = result {
                error!("object {} add failed: {}", objkey, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Report every listed object present in this slot.
    pub fn get(&self, objkeys: &[String], callback: &mut dyn FnMut(&str, &str, Values)) {
        let key = self.key();
        for objkey in objkeys {
            if let Some(modeldata) = self.cachedata.get(objkey) {
                callback(&key, objkey, modeldata.values());
            }
        }
    }

    /// Store every object's values, then the availability marker.
    ///
    /// Per-item insert failures are logged and counted into the marker
    /// without aborting the pass; the marker carries the true counts. The
    /// store fails when any item failed or the marker could not be written
    /// after bounded retries.
    pub fn store(&self, site: &Site, storage: &dyn Storage) -> bool {
        let key = self.key();
        let length = self.cachedata.len();
        let mut errors: u64 = 0;

        debug!("storing site {} cache {} with {} keys", site, key, length);

        for (objkey, modeldata) in &self.cachedata {
            if let Err(e) = storage.insert(objkey, &key, &modeldata.values()) {
                error!("object {}_{} slot {} insert failed: {}", site, objkey, key, e);
                errors += 1;
            }
        }

        let stored = length as u64 - errors;

        for attempt in 1..=MARKER_ATTEMPTS {
            match storage.insert_avail_marker(&key, stored, errors, self.downtime) {
                Ok(()) => {
                    if errors > 0 {
                        error!(
                            "failed to store {}/{} keys of site {} cache {}",
                            errors, length, site, key
                        );
                    } else {
                        info!("stored site {} cache {}", site, key);
                    }
                    return errors == 0;
                }
                Err(e) if attempt < MARKER_ATTEMPTS => {
                    warn!(
                        "site {} cache {} availability marker attempt {} failed: {}",
                        site, key, attempt, e
                    );
                    thread::sleep(MARKER_RETRY_DELAY);
                }
                Err(e) => {
                    error!(
                        "site {} cache {} availability marker failed: {}",
                        site, key, e
                    );
                }
            }
        }

        false
    }

    /// Snapshot record at the current format version.
    pub fn make_backup(&self, snapshot_end: NaiveDateTime) -> SnapshotRecord {
        SnapshotRecord {
            version: BACKUP_VERSION,
            date: None,
            interval_start: Some(self.interval.start()),
            cachedata: self
                .cachedata
                .iter()
                .map(|(objkey, modeldata)| (objkey.clone(), modeldata.values()))
                .collect(),
            downtime: Some(self.downtime.num_seconds()),
            snapshot_end: Some(snapshot_end),
        }
    }

    /// Rebuild a slot from a snapshot record of any supported version.
    pub fn load_backup(
        record: SnapshotRecord,
        registry: &Registry,
        kind: IntervalKind,
    ) -> CacheResult<Self> {
        let interval = match record.version {
            1 => {
                let date = record.date.ok_or_else(|| {
                    BackupError::Malformed("version 1 record without date".to_string())
                })?;
                Interval::basic(kind, date.and_time(chrono::NaiveTime::MIN))
            }
            2 | 3 => {
                let start = record.interval_start.ok_or_else(|| {
                    BackupError::Malformed("record without interval_start".to_string())
                })?;
                Interval::basic(kind, start)
            }
            version => return Err(BackupError::UnsupportedVersion(version).into()),
        };

        let mut cachedata = BTreeMap::new();
        for (objkey, values) in record.cachedata {
            let binding = registry.binding(&objkey).ok_or_else(|| {
                ModelError::UnconfiguredType(Registry::object_type(&objkey).unwrap_or('?'))
            })?;

            let mut modeldata = binding.model.restore_cache(values)?;
            modeldata.upgrade();
            cachedata.insert(objkey, modeldata);
        }

        Ok(Self {
            interval,
            downtime: TimeDelta::seconds(record.downtime.unwrap_or(0)),
            cachedata,
            hook: record.snapshot_end.map(DowntimeHook::SinceSnapshot),
        })
    }
}

impl Clone for Slot {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval.clone(),
            downtime: self.downtime,
            cachedata: self
                .cachedata
                .iter()
                .map(|(objkey, modeldata)| (objkey.clone(), modeldata.boxed_clone()))
                .collect(),
            hook: None,
        }
    }
}
