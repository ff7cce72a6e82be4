// tally-service: Ingress facade over the cache
//
// Wraps every operation with event-log accounting and keeps the
// configuration and registry reloadable for SIGHUP.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::info;

use tally_config::{load_config, Config, Override};
use tally_core::cache::Cache;
use tally_core::error::{CacheError, CacheResult};
use tally_core::eventlog::{self, ERROR_OTHER};
use tally_core::registry::Registry;

/// Event-logged object counts are a one-byte field.
const EVENT_COUNT_LIMIT: usize = 255;

pub struct Service {
    cache: Cache,
    registry: RwLock<Registry>,
    config: RwLock<Config>,
    config_files: Vec<PathBuf>,
    overrides: Vec<Override>,
    start_time: SystemTime,
}

impl Service {
    pub fn new(
        config: Config,
        config_files: Vec<PathBuf>,
        overrides: Vec<Override>,
        cache: Cache,
        registry: Registry,
    ) -> Self {
        Self {
            cache,
            registry: RwLock::new(registry),
            config: RwLock::new(config),
            config_files,
            overrides,
            start_time: SystemTime::now(),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Accumulate one parameter payload for a batch of objects.
    pub fn add(&self, site: &str, objkeys: &[String], data: &str) -> CacheResult<()> {
        let size = data.len();
        let count = objkeys.len().min(EVENT_COUNT_LIMIT);

        let result = (|| {
            let model = self.registry.read().common_model(objkeys)?;
            self.cache.add(site, objkeys, data, model.as_ref())
        })();

        eventlog::with(|log| log.add(site, error_kind(&result), size, count));
        result
    }

    /// Read the live aggregate of a batch of objects as a JSON document.
    pub fn get(&self, site: &str, objkeys: &[String]) -> CacheResult<String> {
        let count = objkeys.len().min(EVENT_COUNT_LIMIT);

        let result = self.cache.get(site, objkeys);

        let size = result.as_ref().map(String::len).unwrap_or(0);
        eventlog::with(|log| log.get(site, error_kind(&result), size, count));
        result
    }

    /// Rotate due slots, store history, snapshot. Errors are contained
    /// inside the cache layer.
    pub fn flush(&self, force_rotate: bool, force_backup: bool) {
        self.cache.flush(force_rotate, force_backup);
    }

    /// Reload configuration files and rebuild the registry bindings. Site
    /// topology changes need a restart; everything else applies live.
    pub fn reconfigure(&self) -> CacheResult<()> {
        let config = load_config(&self.config_files, &self.overrides)
            .and_then(|config| config.validate().map(|()| config))
            .map_err(|e| CacheError::Config(e.to_string()))?;

        let specs = config
            .type_specs()
            .map_err(|e| CacheError::Config(e.to_string()))?;
        self.registry.write().reconfigure(&specs)?;

        *self.config.write() = config;
        info!("reconfigured");
        Ok(())
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.config.read().backup.interval)
    }

    pub fn force_rotation_enabled(&self) -> bool {
        self.config.read().debug.force_cache_rotation
    }

    /// Seconds since the epoch at which this service came up.
    pub fn alive_since(&self) -> u64 {
        self.start_time
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

fn error_kind<T>(result: &CacheResult<T>) -> u32 {
    match result {
        Ok(_) => 0,
        Err(_) => ERROR_OTHER,
    }
}
