//! The entity facade.
//!
//! A [`Model`] holds three layers of values:
//!
//! - **persisted**: what storage held when the model was last loaded or saved;
//! - **unsaved**: values staged since then, which take precedence;
//! - **relations**: resolved related models, cached per relation and dropped
//!   when the property owning the relation's key is reassigned.
//!
//! Reads fall through unsaved, then persisted, then the property default.
//! Lifecycle operations (`create`, `set`, `delete`, ...) live in
//! [`lifecycle`](self) and relation access in `relations`.

mod lifecycle;
mod relations;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use relata_core::{Definition, Errors, Property, Result, Row, ValidationContext, Value};
use serde::{Serialize, Serializer};

use crate::acl::Requester;
use crate::entity::ModelType;
use crate::query::Query;
use crate::registry::{self, TypeEntry};

pub use relations::Loaded;

/// Identity of a persisted model.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    /// The value of the single identity property.
    Single(Value),
    /// Identity property → value, for composite keys.
    Composite(Row),
}

impl Identity {
    /// Identity as `property → value`, given the type's identity properties.
    pub fn to_row(&self, properties: &[String]) -> Row {
        match self {
            Identity::Single(value) => properties
                .first()
                .map(|name| (name.clone(), value.clone()))
                .into_iter()
                .collect(),
            Identity::Composite(row) => row.clone(),
        }
    }

    pub fn as_single(&self) -> Option<&Value> {
        match self {
            Identity::Single(value) => Some(value),
            Identity::Composite(_) => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Single(value) => write!(f, "{}", value),
            Identity::Composite(row) => {
                let parts: Vec<String> = row.values().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

type PermissionKey = (String, String, String);

/// An instance of a model type.
#[derive(Clone)]
pub struct Model {
    pub(crate) entry: Arc<TypeEntry>,
    pub(crate) id: Option<Identity>,
    pub(crate) values: Row,
    pub(crate) unsaved: Row,
    pub(crate) relations: BTreeMap<String, OnceLock<Loaded>>,
    pub(crate) loaded: bool,
    pub(crate) persisted: bool,
    pub(crate) errors: Errors,
    permissions: HashMap<PermissionKey, bool>,
    permissions_bypassed: bool,
}

impl Model {
    /// A new, unsaved model of `ty`. Registers the type on first use.
    pub fn new(ty: &ModelType) -> Result<Self> {
        Ok(Self::from_entry(registry::register(ty)?))
    }

    /// A reference to a stored row by its single identity value, without
    /// loading it. Call [`refresh`](Self::refresh) to load the values.
    pub fn with_id(ty: &ModelType, id: impl Into<Value>) -> Result<Self> {
        let mut model = Self::new(ty)?;
        let property = model.single_id_property()?;
        let id: Value = id.into();
        let id = match model.definition().get(&property) {
            Some(definition) => definition.cast(id),
            None => id,
        };
        model.values.insert(property, id.clone());
        model.id = Some(Identity::Single(id));
        model.persisted = true;
        Ok(model)
    }

    /// Like [`with_id`](Self::with_id) for any identity, including composite.
    pub fn with_identity(ty: &ModelType, identity: Identity) -> Result<Self> {
        let mut model = Self::new(ty)?;
        let ids = model.definition().id_properties().to_vec();
        for (name, value) in identity.to_row(&ids) {
            model.values.insert(name, value);
        }
        model.id = Some(identity);
        model.persisted = true;
        Ok(model)
    }

    pub(crate) fn from_entry(entry: Arc<TypeEntry>) -> Self {
        let relations = entry
            .definition()
            .relations()
            .map(|relation| (relation.name.clone(), OnceLock::new()))
            .collect();
        Self {
            entry,
            id: None,
            values: Row::new(),
            unsaved: Row::new(),
            relations,
            loaded: false,
            persisted: false,
            errors: Errors::new(),
            permissions: HashMap::new(),
            permissions_bypassed: false,
        }
    }

    fn single_id_property(&self) -> Result<String> {
        match self.definition().id_properties() {
            [single] => Ok(single.clone()),
            _ => Err(relata_core::Error::invalid_state(
                self.model_type().name(),
                "type has a composite identity; use with_identity",
            )),
        }
    }

    // ========================================================================
    // Type information
    // ========================================================================

    pub fn model_type(&self) -> &ModelType {
        self.entry.model_type()
    }

    pub fn definition(&self) -> &Definition {
        self.entry.definition()
    }

    pub fn table(&self) -> &str {
        self.entry.definition().table()
    }

    pub(crate) fn entry(&self) -> &Arc<TypeEntry> {
        &self.entry
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn id(&self) -> Option<&Identity> {
        self.id.as_ref()
    }

    /// The single identity value, or `Null` when unset or composite.
    pub fn id_value(&self) -> Value {
        self.id
            .as_ref()
            .and_then(Identity::as_single)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Identity as `property → value`; empty before the first save.
    pub fn identity_values(&self) -> Row {
        self.id
            .as_ref()
            .map(|id| id.to_row(self.definition().id_properties()))
            .unwrap_or_default()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether the model is soft deleted.
    pub fn is_deleted(&self) -> bool {
        self.definition().has_soft_delete() && !self.get(relata_core::DELETED_AT).is_null()
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut Errors {
        &mut self.errors
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Reads a property, applying its accessor.
    pub fn get(&self, name: &str) -> Value {
        let raw = self.raw_value(name);
        match self.entry.behaviors().accessor(name) {
            Some(accessor) => accessor(self, raw),
            None => raw,
        }
    }

    pub fn get_many(&self, names: &[&str]) -> Row {
        names
            .iter()
            .map(|name| (name.to_string(), self.get(name)))
            .collect()
    }

    /// Reads a property without its accessor.
    pub fn raw_value(&self, name: &str) -> Value {
        match self.unsaved.get(name) {
            Some(value) => value.clone(),
            None => self.persisted_or_default(name),
        }
    }

    pub(crate) fn persisted_or_default(&self, name: &str) -> Value {
        if let Some(value) = self.values.get(name) {
            return value.clone();
        }
        self.definition()
            .get(name)
            .and_then(|property| property.default.clone())
            .unwrap_or(Value::Null)
    }

    /// Stages one value, applying the property's mutator.
    ///
    /// Not subject to mass-assignment filtering. Reassigning a column that
    /// holds a relation's key drops that relation's cached result.
    pub fn stage(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        let value = match self.entry.behaviors().mutator(name) {
            Some(mutator) => mutator(value),
            None => value,
        };

        let stale: Vec<String> = self
            .definition()
            .relations_owning(name)
            .map(str::to_string)
            .collect();
        for relation in stale {
            self.relations.insert(relation, OnceLock::new());
        }

        self.unsaved.insert(name.to_string(), value);
        self
    }

    /// Stages every entry of `data` after checking the mass-assignment lists.
    ///
    /// A refused key is an error and nothing is staged.
    pub fn fill(&mut self, data: Row) -> Result<&mut Self> {
        let behaviors = self.entry.behaviors();
        if let Some(refused) = data.keys().find(|key| !behaviors.is_fillable(key)) {
            return Err(relata_core::Error::MassAssignment {
                model: self.model_type().name().to_string(),
                property: refused.clone(),
            });
        }
        for (name, value) in data {
            self.stage(&name, value);
        }
        Ok(self)
    }

    /// Values staged since the last load or save.
    pub fn unsaved(&self) -> &Row {
        &self.unsaved
    }

    /// Discards staged values.
    pub fn clear_unsaved(&mut self) -> &mut Self {
        self.unsaved.clear();
        self
    }

    /// Persisted values as last loaded or saved.
    pub fn persisted_values(&self) -> &Row {
        &self.values
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Visible properties, appended computed properties and already
    /// resolved relations. Hidden properties are left out.
    pub fn to_array(&self) -> Row {
        let mut out = Row::new();
        for property in self.definition().properties() {
            if property.hidden || property.is_relation() {
                continue;
            }
            out.insert(property.name.clone(), self.get(&property.name));
        }
        for (name, slot) in &self.relations {
            let hidden = self.definition().get(name).is_some_and(|p| p.hidden);
            if let (false, Some(loaded)) = (hidden, slot.get()) {
                out.insert(name.clone(), loaded.to_value());
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.to_array()).to_json()
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Whether `requester` holds `permission` on this model.
    ///
    /// Always true for types without a policy and for instances that bypass
    /// permissions. Results are cached on the instance.
    pub fn can(&mut self, permission: &str, requester: &Requester) -> bool {
        if self.permissions_bypassed {
            return true;
        }
        let Some(policy) = self.entry.behaviors().permissions().cloned() else {
            return true;
        };
        let (kind, id) = requester.cache_key();
        let key = (permission.to_string(), kind, id);
        if let Some(&allowed) = self.permissions.get(&key) {
            return allowed;
        }
        let allowed = policy.allows(permission, requester, self);
        self.permissions.insert(key, allowed);
        allowed
    }

    /// Skips permission checks for this instance.
    pub fn grant_all_permissions(&mut self) -> &mut Self {
        self.permissions_bypassed = true;
        self
    }

    pub fn enforce_permissions(&mut self) -> &mut Self {
        self.permissions_bypassed = false;
        self
    }

    pub fn permissions_bypassed(&self) -> bool {
        self.permissions_bypassed
    }

    // ========================================================================
    // Hydration
    // ========================================================================

    /// Builds a loaded model from a stored row.
    pub(crate) fn hydrate(entry: Arc<TypeEntry>, row: &Row) -> Result<Self> {
        let mut model = Self::from_entry(entry);
        model.apply_stored(row)?;
        let ids = model.definition().id_properties().to_vec();
        model.id = match ids.as_slice() {
            [single] => Some(Identity::Single(model.persisted_or_default(single))),
            _ => Some(Identity::Composite(
                ids.iter()
                    .map(|name| (name.clone(), model.persisted_or_default(name)))
                    .collect(),
            )),
        };
        model.loaded = true;
        model.persisted = true;
        Ok(model)
    }

    /// Merges a stored row into the persisted layer, decrypting and casting
    /// declared properties. Undeclared columns, such as joined `table.column`
    /// values, are kept as they are.
    pub(crate) fn apply_stored(&mut self, row: &Row) -> Result<()> {
        let definition = Arc::clone(self.entry.definition());
        for (column, raw) in row {
            let value = match definition.get(column) {
                Some(property) => self.decode(property, raw.clone())?,
                None => raw.clone(),
            };
            self.values.insert(column.clone(), value);
        }
        Ok(())
    }

    fn decode(&self, property: &Property, raw: Value) -> Result<Value> {
        if !property.encrypted || raw.is_null() {
            return Ok(property.cast(raw));
        }
        let encrypter = self.require_encrypter(property)?;
        let ciphertext = raw.to_string();
        Ok(property.cast(Value::Text(encrypter.decrypt(&ciphertext)?)))
    }

    pub(crate) fn require_encrypter(
        &self,
        property: &Property,
    ) -> Result<Arc<dyn crate::encrypt::Encrypter>> {
        registry::encrypter().ok_or_else(|| {
            relata_core::Error::Config(relata_core::ConfigError::for_model(
                self.model_type().name(),
                format!("property `{}` is encrypted but no encrypter is installed", property.name),
            ))
        })
    }
}

impl ValidationContext for Model {
    fn model_name(&self) -> &str {
        self.model_type().name()
    }

    fn persisted_value(&self, property: &str) -> Option<Value> {
        if self.persisted {
            self.values.get(property).cloned()
        } else {
            None
        }
    }

    fn count_matching(&self, column: &str, value: &Value) -> Result<u64> {
        Query::new(self.model_type().clone())
            .with_deleted()
            .where_eq(column, value.clone())
            .count()
    }
}

/// Serializes as [`Model::to_array`].
impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Value::Object(self.to_array()).serialize(serializer)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type", &self.model_type().name())
            .field("id", &self.id)
            .field("values", &self.values)
            .field("unsaved", &self.unsaved)
            .field("loaded", &self.loaded)
            .field("persisted", &self.persisted)
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}
