// tally-core: Per-site composition and the fan-out over sites

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use tally_config::Config;

use crate::active::Active;
use crate::error::{CacheError, CacheResult};
use crate::history::History;
use crate::interval::IntervalKind;
use crate::model::{Model, Values};
use crate::registry::Registry;
use crate::site::{Clock, Site};
use crate::storage::Storage;

/// One site's Active/History pair and its storage handle.
pub struct SiteCache {
    site: Site,
    active: Active,
    history: History,
    storage: Arc<dyn Storage>,
}

impl SiteCache {
    pub fn open(
        site: Site,
        kind: IntervalKind,
        local_cache_format: &str,
        local_history_format: &str,
        registry: &Registry,
        storage: Arc<dyn Storage>,
    ) -> CacheResult<Self> {
        let active = Active::open(
            site.clone(),
            kind,
            local_cache_format,
            registry,
            storage.as_ref(),
        )?;
        let history = History::new(site.clone(), local_history_format)?;

        Ok(Self {
            site,
            active,
            history,
            storage,
        })
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn active(&self) -> &Active {
        &self.active
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Decode the parameter payload and accumulate it. A rotated slot goes
    /// to History even when the model rejects the parameters.
    pub fn add(&self, objkeys: &[String], data: &str, model: &dyn Model) -> CacheResult<()> {
        let params: Value =
            serde_json::from_str(data).map_err(|e| CacheError::Decode(e.to_string()))?;
        if !(params.is_object() || params.is_array()) {
            return Err(CacheError::Decode(
                "parameters must be a mapping or sequence".to_string(),
            ));
        }

        let (closed, result) = self.active.add(objkeys, &params, model);
        if let Some(slot) = closed {
            self.history.append(slot);
        }

        result.map_err(CacheError::from)
    }

    /// Collect the listed objects from History and Active into a JSON
    /// document `{slotkey: {objkey: values}}`. Active is read last so the
    /// live slot overrides a coincident history entry.
    pub fn get(&self, objkeys: &[String]) -> CacheResult<String> {
        let mut slots: BTreeMap<String, Values> = BTreeMap::new();

        let mut collect = |slotkey: &str, objkey: &str, values: Values| {
            slots
                .entry(slotkey.to_string())
                .or_default()
                .insert(objkey.to_string(), Value::Object(values));
        };

        self.history.get(objkeys, &mut collect);
        self.active.get(objkeys, &mut collect);

        serde_json::to_string(&slots).map_err(|e| CacheError::Encode(e.to_string()))
    }

    /// Rotate (forced or due), store History, snapshot Active. Store and
    /// snapshot failures are logged, never propagated.
    pub fn flush(&self, force_rotate: bool, force_backup: bool) {
        if let Some(slot) = self.active.rotate(force_rotate) {
            self.history.append(slot);
        }

        if let Err(e) = self.history.store(&self.storage) {
            error!("site {} history storing failed: {}", self.site, e);
        }

        if let Err(e) = self.active.dump_backup(&self.storage, force_backup) {
            error!("site {} backup dumping failed: {}", self.site, e);
        }
    }
}

/// All configured sites, dispatched by name.
pub struct Cache {
    sitecaches: BTreeMap<String, SiteCache>,
}

impl Cache {
    /// Open every configured site, restoring each Active from its newest
    /// snapshot. `storages` must hold one handle per site.
    pub fn open(
        config: &Config,
        registry: &Registry,
        storages: BTreeMap<String, Arc<dyn Storage>>,
        clock: Clock,
    ) -> CacheResult<Self> {
        let kind: IntervalKind = config
            .interval
            .module
            .parse()
            .map_err(CacheError::Interval)?;

        let mut sitecaches = BTreeMap::new();

        for spec in config.sites().map_err(config_error)? {
            let storage = storages
                .get(&spec.name)
                .cloned()
                .ok_or_else(|| CacheError::UnknownSite(spec.name.clone()))?;

            let site = Site::with_clock(&spec, clock.clone());
            let sitecache = SiteCache::open(
                site,
                kind,
                &config.backup.local_cache_format,
                &config.backup.local_history_format,
                registry,
                storage,
            )?;

            sitecaches.insert(spec.name.clone(), sitecache);
        }

        Ok(Self { sitecaches })
    }

    pub fn sitecache(&self, sitename: &str) -> CacheResult<&SiteCache> {
        self.sitecaches
            .get(sitename)
            .ok_or_else(|| CacheError::UnknownSite(sitename.to_string()))
    }

    pub fn sites(&self) -> impl Iterator<Item = &SiteCache> {
        self.sitecaches.values()
    }

    pub fn len(&self) -> usize {
        self.sitecaches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sitecaches.is_empty()
    }

    pub fn add(
        &self,
        sitename: &str,
        objkeys: &[String],
        data: &str,
        model: &dyn Model,
    ) -> CacheResult<()> {
        self.sitecache(sitename)?.add(objkeys, data, model)
    }

    pub fn get(&self, sitename: &str, objkeys: &[String]) -> CacheResult<String> {
        self.sitecache(sitename)?.get(objkeys)
    }

    pub fn flush(&self, force_rotate: bool, force_backup: bool) {
        for sitecache in self.sitecaches.values() {
            sitecache.flush(force_rotate, force_backup);
        }
    }
}

fn config_error(e: tally_config::ConfigError) -> CacheError {
    CacheError::Config(e.to_string())
}
