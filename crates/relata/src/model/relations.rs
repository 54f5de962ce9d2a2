//! Relation access on a model.
//!
//! Each relation declared on the type has a slot that is either unresolved
//! or holds a [`Loaded`] result. Eager loading fills the slots in batch;
//! reading an unresolved slot loads it lazily and reports the load to the
//! N+1 tracker.

use std::panic::Location;
use std::sync::OnceLock;

use relata_core::{Error, Result, Row, Value};

use super::Model;
use crate::registry;
use crate::relation::{Relation, Relationship};

/// A resolved relation.
#[derive(Debug, Clone)]
pub enum Loaded {
    /// Single-cardinality result; `None` is a resolved empty result.
    One(Option<Box<Model>>),
    Many(Vec<Model>),
}

impl Loaded {
    pub fn as_one(&self) -> Option<&Model> {
        match self {
            Loaded::One(model) => model.as_deref(),
            Loaded::Many(models) => models.first(),
        }
    }

    pub fn as_many(&self) -> &[Model] {
        match self {
            Loaded::One(Some(model)) => std::slice::from_ref(&**model),
            Loaded::One(None) => &[],
            Loaded::Many(models) => models,
        }
    }

    pub fn len(&self) -> usize {
        self.as_many().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_many().is_empty()
    }

    /// Serialized form used by [`Model::to_array`].
    pub fn to_value(&self) -> Value {
        match self {
            Loaded::One(Some(model)) => Value::Object(model.to_array()),
            Loaded::One(None) => Value::Null,
            Loaded::Many(models) => {
                Value::Array(models.iter().map(|m| Value::Object(m.to_array())).collect())
            }
        }
    }
}

impl Model {
    /// The related model of a single-cardinality relation.
    #[track_caller]
    pub fn related(&self, name: &str) -> Result<Option<&Model>> {
        let caller = Location::caller();
        match self.load_relation(name, caller)? {
            Loaded::One(model) => Ok(model.as_deref()),
            Loaded::Many(_) => Err(Error::config(format!(
                "relation `{}` on {} has many results; use related_many",
                name,
                self.model_type()
            ))),
        }
    }

    /// The related models of any relation.
    #[track_caller]
    pub fn related_many(&self, name: &str) -> Result<&[Model]> {
        let caller = Location::caller();
        Ok(self.load_relation(name, caller)?.as_many())
    }

    fn load_relation(&self, name: &str, caller: &'static Location<'static>) -> Result<&Loaded> {
        let slot = self.relations.get(name).ok_or_else(|| {
            Error::config(format!("unknown relation `{}` on {}", name, self.model_type()))
        })?;
        if let Some(loaded) = slot.get() {
            return Ok(loaded);
        }

        registry::lazy_loads(|tracker| {
            tracker.record_load(self.model_type().name(), name, caller);
        });
        let loaded = Relation::for_model(self, name)?.get_results(self)?;
        Ok(slot.get_or_init(|| loaded))
    }

    pub fn is_relation_loaded(&self, name: &str) -> bool {
        self.relations.get(name).is_some_and(|slot| slot.get().is_some())
    }

    /// Stores a resolved result for `name`.
    pub(crate) fn set_loaded(&mut self, name: &str, loaded: Loaded) {
        self.relations.insert(name.to_string(), OnceLock::from(loaded));
    }

    /// Drops the cached result of `name` so the next read reloads it.
    pub fn forget_relation(&mut self, name: &str) {
        if let Some(slot) = self.relations.get_mut(name) {
            slot.take();
        }
    }

    /// The relation object behind a relation property.
    pub fn relation(&self, name: &str) -> Result<Relation> {
        Relation::for_model(self, name)
    }

    pub fn attach(&mut self, name: &str, other: &mut Model) -> Result<bool> {
        self.relation(name)?.attach(self, other)
    }

    /// Detaches `other`, or every related model when `None`.
    pub fn detach(&mut self, name: &str, other: Option<&mut Model>) -> Result<bool> {
        self.relation(name)?.detach(self, other)
    }

    /// Saves `other` and attaches it in one transaction.
    pub fn save_related(&mut self, name: &str, other: &mut Model) -> Result<bool> {
        self.relation(name)?.save(self, other)
    }

    /// Creates a related model from `values` and attaches it.
    pub fn create_related(&mut self, name: &str, values: Row) -> Result<Model> {
        self.relation(name)?.create(self, values)
    }

    /// Removes the related rows (pivot rows for many-to-many) whose ids are
    /// not in `ids`.
    pub fn sync(&mut self, name: &str, ids: Vec<Value>) -> Result<bool> {
        self.relation(name)?.sync(self, ids)
    }
}
