// tally-service: Tracing setup with a reloadable filter

use parking_lot::RwLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Handle for changing the log filter at runtime (the `log.level` admin
/// option).
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    current: RwLock<String>,
}

impl LogHandle {
    pub fn set_filter(&self, directive: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
        self.handle.reload(filter).map_err(|e| e.to_string())?;
        *self.current.write() = directive.to_string();
        Ok(())
    }

    pub fn filter(&self) -> String {
        self.current.read().clone()
    }
}

/// Install the global subscriber: reloadable filter plus a fmt layer.
pub fn init_logging(filter: &str) -> Result<LogHandle, String> {
    let env_filter = EnvFilter::try_new(filter).map_err(|e| e.to_string())?;
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(LogHandle {
        handle,
        current: RwLock::new(filter.to_string()),
    })
}
