// tally-core: Site identity, per-site clock offset

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use tally_config::SiteSpec;

/// Wall-clock source. The system clock by default; tests install a manual
/// clock to drive rotation and staleness scenarios deterministically.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<dyn Fn() -> NaiveDateTime + Send + Sync>,
}

impl Clock {
    pub fn system() -> Self {
        Self {
            inner: Arc::new(|| Utc::now().naive_utc()),
        }
    }

    pub fn fixed(now: NaiveDateTime) -> Self {
        Self {
            inner: Arc::new(move || now),
        }
    }

    /// A clock advanced by hand through the returned handle.
    pub fn manual(start: NaiveDateTime) -> (Self, ManualClock) {
        let shared = Arc::new(Mutex::new(start));
        let handle = ManualClock {
            shared: Arc::clone(&shared),
        };
        let clock = Self {
            inner: Arc::new(move || *shared.lock()),
        };
        (clock, handle)
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.inner)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").finish_non_exhaustive()
    }
}

/// Handle for a manual `Clock`.
#[derive(Clone)]
pub struct ManualClock {
    shared: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn set(&self, now: NaiveDateTime) {
        *self.shared.lock() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.shared.lock() += delta;
    }
}

/// One configured site: a name, a clock offset, and an optional storage
/// table identifier.
#[derive(Debug, Clone)]
pub struct Site {
    name: String,
    offset: TimeDelta,
    table: Option<String>,
    clock: Clock,
}

impl Site {
    pub fn new(spec: &SiteSpec) -> Self {
        Self::with_clock(spec, Clock::system())
    }

    pub fn with_clock(spec: &SiteSpec, clock: Clock) -> Self {
        Self {
            name: spec.name.clone(),
            offset: TimeDelta::hours(spec.offset_hours as i64),
            table: spec.table.clone(),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    /// The storage table this site writes to (the site name by default).
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// The wall clock, without the site offset.
    pub fn wall_datetime(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Site-local time: wall clock plus the configured offset.
    pub fn current_datetime(&self) -> NaiveDateTime {
        self.clock.now() + self.offset
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
