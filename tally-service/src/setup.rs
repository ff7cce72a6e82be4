// tally-service: Wiring of configuration, storage and cache

use std::collections::BTreeMap;
use std::sync::Arc;

use tally_config::Config;
use tally_core::cache::Cache;
use tally_core::error::{CacheError, CacheResult};
use tally_core::registry::Registry;
use tally_core::site::Clock;
use tally_core::storage::Storage;
use tally_storage::SledStorage;

/// One sled-backed storage handle per configured site.
pub fn open_storages(config: &Config) -> CacheResult<BTreeMap<String, Arc<dyn Storage>>> {
    let db = ::sled::open(&config.storage.path)
        .map_err(|e| CacheError::Config(format!("{}: {e}", config.storage.path)))?;

    let mut storages: BTreeMap<String, Arc<dyn Storage>> = BTreeMap::new();

    for spec in config
        .sites()
        .map_err(|e| CacheError::Config(e.to_string()))?
    {
        let table = spec.table.clone().unwrap_or_else(|| spec.name.clone());
        let storage = SledStorage::new(db.clone(), spec.name.clone(), table);
        storages.insert(spec.name, Arc::new(storage));
    }

    Ok(storages)
}

/// Open the full cache over sled storage with the system clock.
pub fn open_cache(config: &Config, registry: &Registry) -> CacheResult<Cache> {
    let storages = open_storages(config)?;
    Cache::open(config, registry, storages, Clock::system())
}
