// tally-core: General-purpose counter model
//
// Accumulates a mapping of arbitrary item keys to numeric deltas. Integer
// totals stay exact; any float input degrades the item to float arithmetic.

use chrono::TimeDelta;
use serde_json::{Number, Value};

use crate::error::ModelError;
use crate::model::{CacheModel, Model, TimelineModel, Values};

pub const COUNTERS_MODEL_ID: &str = "counters";

/// Factory for the `counters` model.
pub struct Counters;

impl Model for Counters {
    fn id(&self) -> &'static str {
        COUNTERS_MODEL_ID
    }

    fn new_cache(&self) -> Box<dyn CacheModel> {
        Box::new(CounterState::default())
    }

    fn restore_cache(&self, values: Values) -> Result<Box<dyn CacheModel>, ModelError> {
        Ok(Box::new(CounterState { items: values }))
    }

    fn new_timeline(&self, items: Option<Values>) -> Box<dyn TimelineModel> {
        Box::new(CounterState {
            items: items.unwrap_or_default(),
        })
    }
}

#[derive(Default)]
struct CounterState {
    items: Values,
}

impl CounterState {
    fn increment(&mut self, itemkey: &str, delta: &Value) {
        let total = match self.items.get(itemkey) {
            Some(current) => add_numbers(current, delta),
            None => delta.clone(),
        };
        self.items.insert(itemkey.to_string(), total);
    }
}

impl CacheModel for CounterState {
    fn model_id(&self) -> &'static str {
        COUNTERS_MODEL_ID
    }

    fn add(&mut self, params: &Value, _offset: TimeDelta) -> Result<(), ModelError> {
        let map = params
            .as_object()
            .ok_or_else(|| ModelError::BadParams("counters expects a mapping".to_string()))?;

        for (itemkey, delta) in map {
            if !delta.is_number() {
                return Err(ModelError::BadParams(format!(
                    "counter item {itemkey} is not a number"
                )));
            }
            self.increment(itemkey, delta);
        }

        Ok(())
    }

    fn values(&self) -> Values {
        self.items.clone()
    }

    fn boxed_clone(&self) -> Box<dyn CacheModel> {
        Box::new(CounterState {
            items: self.items.clone(),
        })
    }
}

impl TimelineModel for CounterState {
    fn model_id(&self) -> &'static str {
        COUNTERS_MODEL_ID
    }

    fn merge(&mut self, other: &Values) {
        for (itemkey, value) in other {
            if value.is_number() {
                self.increment(itemkey, value);
            }
        }
    }

    fn values(&self) -> Values {
        self.items.clone()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn add_numbers(a: &Value, b: &Value) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Value::Number(Number::from(sum));
        }
    }

    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
