//! Model types and their per-type configuration.
//!
//! A model type is declared by implementing [`Entity`]:
//!
//! ```ignore
//! struct Person;
//!
//! impl Entity for Person {
//!     const NAME: &'static str = "Person";
//!
//!     fn schema() -> Schema {
//!         Schema::new()
//!             .property(Property::string("name").required())
//!             .property(Property::string("email").validate("email").unique())
//!             .belongs_to("team", Team::model_type())
//!             .timestamps()
//!     }
//! }
//!
//! let mut person = Person::new()?;
//! person.create(row! { "name" => "Ada", "email" => "ada@example.com" })?;
//! ```
//!
//! [`ModelType`] is the runtime handle the engine passes around. Besides entity
//! types it represents the synthetic pivot types behind belongs-to-many
//! relations.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use relata_core::{DefinitionOptions, Property, PropertyType, RelationSpec, Result, Row, Value};

use crate::acl::PermissionPolicy;
use crate::model::Model;
use crate::query::Query;

/// Read transform applied by [`Model::get`].
pub type Accessor = Arc<dyn Fn(&Model, Value) -> Value + Send + Sync>;

/// Write transform applied by [`Model::stage`].
pub type Mutator = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A statically declared model type.
pub trait Entity {
    /// Type name, unique within the process.
    const NAME: &'static str;

    /// The type's properties and behaviors. Called once per registration.
    fn schema() -> Schema;

    fn model_type() -> ModelType
    where
        Self: Sized + 'static,
    {
        ModelType::of::<Self>()
    }

    /// A new, unsaved model.
    fn new() -> Result<Model>
    where
        Self: Sized + 'static,
    {
        Model::new(&Self::model_type())
    }

    fn query() -> Query
    where
        Self: Sized + 'static,
    {
        Query::new(Self::model_type())
    }

    fn find(id: impl Into<Value>) -> Result<Option<Model>>
    where
        Self: Sized + 'static,
    {
        Model::find(&Self::model_type(), id)
    }

    fn find_or_fail(id: impl Into<Value>) -> Result<Model>
    where
        Self: Sized + 'static,
    {
        Model::find_or_fail(&Self::model_type(), id)
    }

    /// Creates and returns a model; check [`Model::is_persisted`] and
    /// [`Model::errors`] for the outcome.
    fn create(data: Row) -> Result<Model>
    where
        Self: Sized + 'static,
    {
        let mut model = Self::new()?;
        model.create(data)?;
        Ok(model)
    }
}

#[derive(Clone)]
enum TypeSource {
    Entity(fn() -> Schema),
    Pivot(Arc<PivotKeys>),
}

#[derive(Debug)]
struct PivotKeys {
    table: String,
    local_key: String,
    foreign_key: String,
}

/// Runtime handle of a model type. Two handles are equal when their names are.
#[derive(Clone)]
pub struct ModelType {
    name: Arc<str>,
    source: TypeSource,
}

impl ModelType {
    pub fn of<E: Entity + 'static>() -> Self {
        Self {
            name: Arc::from(E::NAME),
            source: TypeSource::Entity(E::schema),
        }
    }

    /// A type declared without an [`Entity`] impl.
    pub fn from_fn(name: &str, schema: fn() -> Schema) -> Self {
        Self {
            name: Arc::from(name),
            source: TypeSource::Entity(schema),
        }
    }

    /// The synthetic type of a belongs-to-many pivot table, identified by
    /// both key columns.
    pub fn pivot(table: &str, local_key: &str, foreign_key: &str) -> Self {
        Self {
            name: Arc::from(format!("pivot:{}", table)),
            source: TypeSource::Pivot(Arc::new(PivotKeys {
                table: table.to_string(),
                local_key: local_key.to_string(),
                foreign_key: foreign_key.to_string(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_pivot(&self) -> bool {
        matches!(self.source, TypeSource::Pivot(_))
    }

    pub(crate) fn schema(&self) -> Schema {
        match &self.source {
            TypeSource::Entity(schema) => schema(),
            TypeSource::Pivot(keys) => Schema::new()
                .table(&keys.table)
                .property(Property::integer(&keys.local_key))
                .property(Property::integer(&keys.foreign_key))
                .id_properties([keys.local_key.as_str(), keys.foreign_key.as_str()]),
        }
    }
}

impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ModelType {}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelType").field(&self.name).finish()
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Engine-side behaviors of a type, fixed at registration.
#[derive(Clone)]
pub struct Behaviors {
    accessors: HashMap<String, Accessor>,
    mutators: HashMap<String, Mutator>,
    fillable: Option<BTreeSet<String>>,
    guarded: BTreeSet<String>,
    transactions: bool,
    permissions: Option<Arc<dyn PermissionPolicy>>,
    cache_ttl: Option<Duration>,
    cached: bool,
}

impl Default for Behaviors {
    fn default() -> Self {
        Self {
            accessors: HashMap::new(),
            mutators: HashMap::new(),
            fillable: None,
            guarded: BTreeSet::new(),
            transactions: false,
            permissions: None,
            cache_ttl: None,
            cached: true,
        }
    }
}

impl Behaviors {
    pub fn accessor(&self, property: &str) -> Option<&Accessor> {
        self.accessors.get(property)
    }

    pub fn mutator(&self, property: &str) -> Option<&Mutator> {
        self.mutators.get(property)
    }

    /// Whether mass assignment may write `property`.
    ///
    /// An allow list admits only its members; otherwise the deny list
    /// excludes its members.
    pub fn is_fillable(&self, property: &str) -> bool {
        match &self.fillable {
            Some(allowed) => allowed.contains(property),
            None => !self.guarded.contains(property),
        }
    }

    pub fn uses_transactions(&self) -> bool {
        self.transactions
    }

    pub fn permissions(&self) -> Option<&Arc<dyn PermissionPolicy>> {
        self.permissions.as_ref()
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

impl fmt::Debug for Behaviors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behaviors")
            .field("accessors", &self.accessors.keys().collect::<Vec<_>>())
            .field("mutators", &self.mutators.keys().collect::<Vec<_>>())
            .field("fillable", &self.fillable)
            .field("guarded", &self.guarded)
            .field("transactions", &self.transactions)
            .field("permissions", &self.permissions.is_some())
            .field("cache_ttl", &self.cache_ttl)
            .field("cached", &self.cached)
            .finish()
    }
}

/// Declaration of one model type.
#[derive(Clone, Default)]
pub struct Schema {
    pub(crate) properties: Vec<Property>,
    pub(crate) options: DefinitionOptions,
    pub(crate) related: Vec<ModelType>,
    pub(crate) behaviors: Behaviors,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.options.table = Some(table.into());
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// A computed property, never stored, included in `to_array`.
    ///
    /// Its value normally comes from an [`accessor`](Self::accessor).
    pub fn appended(self, name: &str, ty: PropertyType) -> Self {
        self.property(Property::computed(name, ty))
    }

    /// Declares a relation property. `targets` are the types the relation
    /// can resolve to.
    pub fn relation(
        mut self,
        name: &str,
        spec: RelationSpec,
        targets: impl IntoIterator<Item = ModelType>,
    ) -> Self {
        self.related.extend(targets);
        self.property(Property::relation(name, spec))
    }

    pub fn belongs_to(self, name: &str, target: ModelType) -> Self {
        let spec = RelationSpec::belongs_to(target.name());
        self.relation(name, spec, [target])
    }

    pub fn has_one(self, name: &str, target: ModelType) -> Self {
        let spec = RelationSpec::has_one(target.name());
        self.relation(name, spec, [target])
    }

    pub fn has_many(self, name: &str, target: ModelType) -> Self {
        let spec = RelationSpec::has_many(target.name());
        self.relation(name, spec, [target])
    }

    pub fn belongs_to_many(self, name: &str, target: ModelType) -> Self {
        let spec = RelationSpec::belongs_to_many(target.name());
        self.relation(name, spec, [target])
    }

    /// A polymorphic relation; `map` pairs discriminator values with types.
    pub fn morph_to<I, S>(self, name: &str, map: I) -> Self
    where
        I: IntoIterator<Item = (S, ModelType)>,
        S: Into<String>,
    {
        let mut spec = RelationSpec::polymorphic();
        let mut targets = Vec::new();
        for (discriminator, target) in map {
            spec = spec.morph(discriminator, target.name());
            targets.push(target);
        }
        self.relation(name, spec, targets)
    }

    /// Maintains `created_at` and `updated_at`.
    pub fn timestamps(mut self) -> Self {
        self.options.timestamps = true;
        self
    }

    /// Deletes stamp `deleted_at` instead of removing the row.
    pub fn soft_delete(mut self) -> Self {
        self.options.soft_delete = true;
        self
    }

    /// Wraps create, update and delete in a transaction.
    pub fn transactions(mut self) -> Self {
        self.behaviors.transactions = true;
        self
    }

    pub fn id_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.id_properties = names.into_iter().map(Into::into).collect();
        self
    }

    /// Mass assignment allow list. Takes precedence over [`guarded`](Self::guarded).
    pub fn fillable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.behaviors.fillable = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Mass assignment deny list.
    pub fn guarded<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.behaviors.guarded = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn accessor<F>(mut self, property: &str, accessor: F) -> Self
    where
        F: Fn(&Model, Value) -> Value + Send + Sync + 'static,
    {
        self.behaviors
            .accessors
            .insert(property.to_string(), Arc::new(accessor));
        self
    }

    pub fn mutator<F>(mut self, property: &str, mutator: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.behaviors
            .mutators
            .insert(property.to_string(), Arc::new(mutator));
        self
    }

    /// Enforces `policy` on create, edit and delete.
    pub fn permissions(mut self, policy: impl PermissionPolicy + 'static) -> Self {
        self.behaviors.permissions = Some(Arc::new(policy));
        self
    }

    /// Cache TTL for this type, overriding the global default.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.behaviors.cache_ttl = Some(ttl);
        self
    }

    /// Keeps this type out of the model cache.
    pub fn uncached(mut self) -> Self {
        self.behaviors.cached = false;
        self
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("properties", &self.properties)
            .field("options", &self.options)
            .field("related", &self.related)
            .field("behaviors", &self.behaviors)
            .finish()
    }
}
