// tally-service: Admin counters and options

use std::collections::BTreeMap;
use std::sync::Arc;

use tally_core::error::{CacheError, CacheResult};

use crate::logging::LogHandle;
use crate::service::Service;

/// The optional admin surface: process gauges and runtime options.
pub struct Admin {
    service: Arc<Service>,
    log_handle: Option<Arc<LogHandle>>,
}

impl Admin {
    pub fn new(service: Arc<Service>, log_handle: Option<Arc<LogHandle>>) -> Self {
        Self {
            service,
            log_handle,
        }
    }

    pub fn alive_since(&self) -> u64 {
        self.service.alive_since()
    }

    pub fn counter(&self, key: &str) -> Option<i64> {
        match key {
            "proc.vmsize" => vmsize(),
            "cache.sites" => Some(self.service.cache().len() as i64),
            _ => None,
        }
    }

    pub fn counters(&self) -> BTreeMap<String, i64> {
        ["proc.vmsize", "cache.sites"]
            .into_iter()
            .filter_map(|key| self.counter(key).map(|value| (key.to_string(), value)))
            .collect()
    }

    pub fn set_option(&self, key: &str, value: &str) -> CacheResult<()> {
        match key {
            "log.level" => {
                let handle = self
                    .log_handle
                    .as_ref()
                    .ok_or_else(|| CacheError::Config("logging not initialised".to_string()))?;
                handle
                    .set_filter(value)
                    .map_err(CacheError::Config)
            }
            _ => Err(CacheError::Config(format!("unknown option: {key}"))),
        }
    }

    pub fn option(&self, key: &str) -> Option<String> {
        match key {
            "log.level" => self.log_handle.as_ref().map(|handle| handle.filter()),
            _ => None,
        }
    }

    pub fn options(&self) -> BTreeMap<String, String> {
        ["log.level"]
            .into_iter()
            .filter_map(|key| self.option(key).map(|value| (key.to_string(), value)))
            .collect()
    }
}

/// Virtual memory size of this process in bytes, from /proc.
#[cfg(target_os = "linux")]
fn vmsize() -> Option<i64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmSize:"))?;
    let kilobytes: i64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kilobytes * 1024)
}

#[cfg(not(target_os = "linux"))]
fn vmsize() -> Option<i64> {
    None
}
