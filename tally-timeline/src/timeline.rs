// tally-timeline: Ordered slot timeline and mutation planning

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{error, warn};

use tally_core::interval::{Interval, IntervalKind};
use tally_core::model::{Model, ModelSlot, Values};
use tally_core::site::Site;
use tally_core::storage::Storage;

use crate::error::{TimelineError, TimelineResult};

/// Planned column changes of one object.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Mutation {
    pub insert: BTreeMap<String, Values>,
    pub remove: Vec<String>,
}

impl Mutation {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.remove.is_empty()
    }
}

/// All stored slots of one object, ordered by interval, with the invariant
/// that no two slots overlap partially: a slot may contain another (they
/// will be merged), but a straddling overlap is a data defect.
pub struct Timeline {
    site: Site,
    objkey: String,
    model: Arc<dyn Model>,
    kind: IntervalKind,
    slots: Vec<ModelSlot>,
    updated: Vec<String>,
    removed: Vec<String>,
}

impl Timeline {
    pub fn new(site: Site, objkey: impl Into<String>, model: Arc<dyn Model>, kind: IntervalKind) -> Self {
        Self {
            site,
            objkey: objkey.into(),
            model,
            kind,
            slots: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn objkey(&self) -> &str {
        &self.objkey
    }

    pub fn kind(&self) -> IntervalKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Start of the earliest slot.
    pub fn start(&self) -> Option<NaiveDateTime> {
        self.slots.first().map(|slot| slot.interval.start())
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.iter().map(ModelSlot::key).collect()
    }

    pub fn updated(&self) -> &[String] {
        &self.updated
    }

    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    /// Whether merging or updating changed anything.
    pub fn modified(&self) -> bool {
        !self.updated.is_empty() || !self.removed.is_empty()
    }

    /// Insert one stored slot at its ordered position, enforcing the
    /// overlap invariant against both neighbours.
    pub fn add(&mut self, key: &str, items: Values) -> TimelineResult<()> {
        let interval = Interval::parse(self.kind, key)?;
        let slot = ModelSlot::new(interval, self.model.new_timeline(Some(items)));

        let i = self
            .slots
            .partition_point(|other| other.interval < slot.interval);

        if i < self.slots.len() && self.slots[i].interval == slot.interval {
            error!("site {} key {}: duplicate slot {}", self.site, self.objkey, key);
            return Err(TimelineError::DuplicateSlot {
                objkey: self.objkey.clone(),
                key: key.to_string(),
            });
        }

        if i > 0 {
            let left = &self.slots[i - 1];
            if left.overlaps(&slot) {
                if left.contains(&slot) {
                    warn!(
                        "site {} key {}: slot {} contained in {}",
                        self.site,
                        self.objkey,
                        key,
                        left.key()
                    );
                    // they will be merged
                } else {
                    error!(
                        "site {} key {}: slot {} overlaps with {}",
                        self.site,
                        self.objkey,
                        key,
                        left.key()
                    );
                    return Err(TimelineError::Overlap {
                        objkey: self.objkey.clone(),
                        key: key.to_string(),
                        other: left.key(),
                    });
                }
            }
        }

        if i < self.slots.len() {
            let right = &self.slots[i];
            if slot.overlaps(right) {
                if slot.contains(right) {
                    warn!(
                        "site {} key {}: slot {} contains {}",
                        self.site,
                        self.objkey,
                        key,
                        right.key()
                    );
                    // they will be merged
                } else {
                    error!(
                        "site {} key {}: slot {} overlaps with {}",
                        self.site,
                        self.objkey,
                        key,
                        right.key()
                    );
                    return Err(TimelineError::Overlap {
                        objkey: self.objkey.clone(),
                        key: key.to_string(),
                        other: right.key(),
                    });
                }
            }
        }

        self.slots.insert(i, slot);
        Ok(())
    }

    /// Batch hook for the model, once everything is loaded.
    pub fn prepare(&mut self) {
        let model = Arc::clone(&self.model);
        model.prepare(&mut self.slots);
    }

    /// Try to merge every slot contained in `[start, start + delta)` into a
    /// single slot. Aborts without touching anything when the candidate
    /// would partially overlap an existing slot; a no-op when fewer than two
    /// slots would be merged.
    pub fn merge(&mut self, start: NaiveDateTime, delta: TimeDelta) {
        let interval = Interval::new(self.kind, start, delta);
        let mut candidate = ModelSlot::new(interval, self.model.new_timeline(None));

        let i = self
            .slots
            .partition_point(|other| other.interval < candidate.interval);

        if i > 0 {
            let left = &self.slots[i - 1];
            if left.overlaps(&candidate) {
                if left.contains(&candidate) {
                    warn!(
                        "site {} key {}: tried to create slot {} which is subset of {}",
                        self.site,
                        self.objkey,
                        candidate.key(),
                        left.key()
                    );
                } else {
                    warn!(
                        "site {} key {}: tried to create slot {} overlapping {}",
                        self.site,
                        self.objkey,
                        candidate.key(),
                        left.key()
                    );
                }
                return;
            }
        }

        let mut count = 0;
        while i + count < self.slots.len() {
            let right = &self.slots[i + count];

            if !candidate.contains(right) {
                if candidate.overlaps(right) {
                    warn!(
                        "site {} key {}: tried to create slot {} overlapping {}",
                        self.site,
                        self.objkey,
                        candidate.key(),
                        right.key()
                    );
                    return;
                }
                // out of reach
                break;
            }

            count += 1;
        }

        if count < 2 {
            return;
        }

        for slot in &self.slots[i..i + count] {
            candidate.data.merge(&slot.data.values());
        }

        let candidate_key = candidate.key();
        let mut removed: Vec<String> = self
            .slots
            .splice(i..i + count, [candidate])
            .map(|slot| slot.key())
            .collect();

        if let Some(at) = removed.iter().position(|key| *key == candidate_key) {
            warn!(
                "site {} key {}: updating slot {}",
                self.site, self.objkey, candidate_key
            );
            removed.remove(at);
            debug_assert!(!removed.is_empty());
        }

        self.updated.push(candidate_key);
        self.removed.extend(removed);
    }

    /// Let the model rewrite every slot in place, tracking the changed ones.
    pub fn update(&mut self) {
        for slot in &mut self.slots {
            let interval = slot.interval.clone();
            if slot.data.update(&interval) {
                let key = slot.key();
                if !slot.data.is_empty() {
                    if !self.updated.contains(&key) {
                        self.updated.push(key);
                    }
                } else {
                    self.removed.push(key);
                }
            }
        }
    }

    /// The column mutation implied by `updated` and `removed`.
    pub fn plan(&self) -> Mutation {
        let mut mutation = Mutation::default();

        for key in &self.updated {
            if let Some(slot) = self.slots.iter().find(|slot| slot.key() == *key) {
                mutation.insert.insert(key.clone(), slot.data.values());
            }
        }
        mutation.remove.extend(self.removed.iter().cloned());

        mutation
    }

    /// Plan and optionally apply the mutation.
    pub fn mutate(&self, storage: &dyn Storage, store: bool) -> TimelineResult<Mutation> {
        let mutation = self.plan();

        if store && !mutation.is_empty() {
            storage.mutate(&self.objkey, &mutation.insert, &mutation.remove)?;
        }

        Ok(mutation)
    }

    /// Current values of one slot, for dumps and tests.
    pub fn slot_values(&self, key: &str) -> Option<Values> {
        self.slots
            .iter()
            .find(|slot| slot.key() == key)
            .map(|slot| slot.data.values())
    }
}
