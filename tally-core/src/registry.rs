// tally-core: Model and pattern registry
//
// Maps object types (the first character of an object key) to a model and an
// optional timeline pattern id, as configured in the `[type]` section.

use std::collections::BTreeMap;
use std::sync::Arc;

use tally_config::TypeSpec;

use crate::counters::Counters;
use crate::error::ModelError;
use crate::model::Model;

/// Binding of one object type character.
#[derive(Clone)]
pub struct TypeBinding {
    pub model: Arc<dyn Model>,
    pub pattern: Option<String>,
}

pub struct Registry {
    models: BTreeMap<&'static str, Arc<dyn Model>>,
    types: BTreeMap<char, TypeBinding>,
}

impl Registry {
    /// Registry with the built-in models, bound per the given type specs.
    pub fn new(specs: &[TypeSpec]) -> Result<Self, ModelError> {
        Self::with_models(vec![Arc::new(Counters)], specs)
    }

    /// Registry with an explicit model set (built-ins plus extensions).
    pub fn with_models(
        models: Vec<Arc<dyn Model>>,
        specs: &[TypeSpec],
    ) -> Result<Self, ModelError> {
        let mut registry = Self {
            models: models.into_iter().map(|m| (m.id(), m)).collect(),
            types: BTreeMap::new(),
        };
        registry.reconfigure(specs)?;
        Ok(registry)
    }

    /// Rebuild the type bindings, e.g. after a configuration reload.
    pub fn reconfigure(&mut self, specs: &[TypeSpec]) -> Result<(), ModelError> {
        let mut types = BTreeMap::new();

        for spec in specs {
            let model = self
                .models
                .get(spec.model.as_str())
                .cloned()
                .ok_or_else(|| ModelError::UnknownModel(spec.model.clone()))?;

            for objtype in &spec.prefixes {
                types.insert(
                    *objtype,
                    TypeBinding {
                        model: Arc::clone(&model),
                        pattern: spec.pattern.clone(),
                    },
                );
            }
        }

        self.types = types;
        Ok(())
    }

    /// The type character of an object key.
    pub fn object_type(objkey: &str) -> Option<char> {
        objkey.chars().next()
    }

    pub fn binding(&self, objkey: &str) -> Option<&TypeBinding> {
        Self::object_type(objkey).and_then(|objtype| self.types.get(&objtype))
    }

    /// Model and pattern id for one object key.
    pub fn model_and_pattern(&self, objkey: &str) -> Option<(Arc<dyn Model>, Option<String>)> {
        self.binding(objkey)
            .map(|binding| (Arc::clone(&binding.model), binding.pattern.clone()))
    }

    /// The single model shared by all given object keys. Batches mixing
    /// models are rejected.
    pub fn common_model(&self, objkeys: &[String]) -> Result<Arc<dyn Model>, ModelError> {
        let mut common: Option<Arc<dyn Model>> = None;

        for objkey in objkeys {
            let objtype = Self::object_type(objkey)
                .ok_or_else(|| ModelError::BadParams("empty object key".to_string()))?;
            let binding = self
                .types
                .get(&objtype)
                .ok_or(ModelError::UnconfiguredType(objtype))?;

            match &common {
                None => common = Some(Arc::clone(&binding.model)),
                Some(model) if model.id() == binding.model.id() => {}
                Some(_) => {
                    let mut objtypes: Vec<String> = objkeys
                        .iter()
                        .filter_map(|key| Self::object_type(key))
                        .map(|c| c.to_string())
                        .collect();
                    objtypes.dedup();
                    return Err(ModelError::IncompatibleTypes(objtypes.join(" ")));
                }
            }
        }

        common.ok_or_else(|| ModelError::BadParams("no object keys".to_string()))
    }
}
