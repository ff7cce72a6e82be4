// tally-core: Event log sink contract
//
// Accounting events for ingress traffic and storage operations. The sink is
// a process-wide singleton defaulting to a no-op; deployments install their
// own at startup.

use std::sync::Arc;

use parking_lot::RwLock;

pub const ERROR_OTHER: u32 = 1;
pub const ERROR_NETWORK: u32 = 5;
pub const ERROR_STORAGE: u32 = 6;

/// Event sink. `error` is zero on success, one of the `ERROR_*` kinds
/// otherwise.
pub trait EventLog: Send + Sync {
    fn add(&self, _site: &str, _error: u32, _size: usize, _count: usize) {}
    fn get(&self, _site: &str, _error: u32, _size: usize, _count: usize) {}
    fn store(&self, _site: &str, _error: u32, _size: usize, _objtype: u8) {}
    fn mutate(&self, _site: &str, _error: u32, _size: usize, _objtype: u8) {}
    fn cache_backup(&self, _site: &str, _error: u32, _size: usize, _local: bool) {}
    fn store_local_backup(&self, _site: &str, _error: u32, _path: &str) {}
    fn service_error(&self, _error: u32) {}
}

/// The default sink: drops everything.
pub struct NullEventLog;

impl EventLog for NullEventLog {}

static SINK: RwLock<Option<Arc<dyn EventLog>>> = RwLock::new(None);

/// Install the process-wide sink.
pub fn install(sink: Arc<dyn EventLog>) {
    *SINK.write() = Some(sink);
}

/// Run `f` against the installed sink, if any.
pub fn with<F: FnOnce(&dyn EventLog)>(f: F) {
    if let Some(sink) = &*SINK.read() {
        f(sink.as_ref());
    }
}

/// The event-logged type of an object key: its first byte.
pub fn objtype_of(objkey: &str) -> u8 {
    objkey.as_bytes().first().copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingLog {
        adds: AtomicUsize,
    }

    impl EventLog for CountingLog {
        fn add(&self, _site: &str, _error: u32, _size: usize, _count: usize) {
            self.adds.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn installed_sink_receives_events() {
        let sink = Arc::new(CountingLog {
            adds: AtomicUsize::new(0),
        });
        install(sink.clone());

        with(|log| log.add("s", 0, 10, 1));
        with(|log| log.get("s", 0, 10, 1));

        assert_eq!(sink.adds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn objtype_is_the_first_byte() {
        assert_eq!(objtype_of("c_x"), b'c');
        assert_eq!(objtype_of(""), 0);
    }
}
