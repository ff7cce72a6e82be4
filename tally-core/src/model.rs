// tally-core: Model plugin contracts
//
// A model owns the accumulation and merge logic for one object type. The
// engine treats model state as opaque: everything it needs goes through the
// two capability traits below plus the `Model` factory that a registry maps
// object types to.

use chrono::TimeDelta;
use serde_json::Value;

use crate::error::ModelError;
use crate::interval::Interval;

/// Serialisable model state: what `get()` returns, what snapshots carry and
/// what the column store receives.
pub type Values = serde_json::Map<String, Value>;

/// Per-object accumulation state inside an open or closed slot.
pub trait CacheModel: Send {
    /// Id of the model that produced this state.
    fn model_id(&self) -> &'static str;

    /// Fold one parameter value (a mapping or sequence) into the state.
    /// `offset` is the time elapsed since the slot's interval started.
    fn add(&mut self, params: &Value, offset: TimeDelta) -> Result<(), ModelError>;

    /// The serialisable view of the state.
    fn values(&self) -> Values;

    /// Migration hook, called once after deserialisation.
    fn upgrade(&mut self) {}

    fn boxed_clone(&self) -> Box<dyn CacheModel>;
}

/// Per-object state during offline timeline processing.
pub trait TimelineModel: Send {
    fn model_id(&self) -> &'static str;

    /// Fold another slot's state into this one.
    fn merge(&mut self, other: &Values);

    /// Rewrite the state in place; return whether anything changed.
    fn update(&mut self, _interval: &Interval) -> bool {
        false
    }

    fn values(&self) -> Values;

    fn is_empty(&self) -> bool;
}

/// One slot of a timeline: an interval and the model state stored for it.
pub struct ModelSlot {
    pub interval: Interval,
    pub data: Box<dyn TimelineModel>,
}

impl ModelSlot {
    pub fn new(interval: Interval, data: Box<dyn TimelineModel>) -> Self {
        Self { interval, data }
    }

    pub fn key(&self) -> String {
        self.interval.key()
    }

    /// Whether this slot reaches into `other` (callers order the operands:
    /// `self` starts no later than `other`).
    pub fn overlaps(&self, other: &ModelSlot) -> bool {
        self.interval.end() > other.interval.start()
    }

    /// Whether `other` ends within this slot.
    pub fn contains(&self, other: &ModelSlot) -> bool {
        self.interval.end() >= other.interval.end()
    }
}

/// Model factory, registered under a short id and bound to object types via
/// the `[type]` configuration section.
pub trait Model: Send + Sync {
    fn id(&self) -> &'static str;

    /// Fresh accumulation state for one object.
    fn new_cache(&self) -> Box<dyn CacheModel>;

    /// Rebuild accumulation state from a snapshot's serialised view.
    fn restore_cache(&self, values: Values) -> Result<Box<dyn CacheModel>, ModelError>;

    /// Timeline state, optionally seeded from stored column values.
    fn new_timeline(&self, items: Option<Values>) -> Box<dyn TimelineModel>;

    /// Batch hook invoked once over a fully loaded timeline before merging.
    fn prepare(&self, _slots: &mut [ModelSlot]) {}
}
