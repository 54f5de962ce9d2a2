//! Relation variants.
//!
//! Every relation kind implements [`Relationship`]: it builds the query for
//! one local model's related rows, runs it, and attaches or detaches related
//! models by writing the keys the kind owns. [`Relation`] is the tagged union
//! the engine resolves from a relation property.
//!
//! | kind | keys written by `attach` |
//! |---|---|
//! | [`BelongsTo`] | local `{property}_id` |
//! | [`HasOne`], [`HasMany`] | foreign `{local type}_id` on the other model |
//! | [`BelongsToMany`] | a pivot row holding both keys |
//! | [`Polymorphic`] | local `{property}_type` and `{property}_id` |
//!
//! A local key that is unset is an empty result, never an error.

mod belongs_to;
mod belongs_to_many;
mod has;
mod polymorphic;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::BelongsToMany;
pub use has::{HasMany, HasOne};
pub use polymorphic::Polymorphic;

use relata_core::{Error, RelationInfo, RelationKind, Result, Row, Value};

use crate::entity::ModelType;
use crate::model::{Loaded, Model};
use crate::query::Query;
use crate::registry;
use crate::transaction::TransactionScope;

/// The contract shared by all relation kinds.
pub trait Relationship {
    fn info(&self) -> &RelationInfo;

    /// The query selecting `local`'s related rows, or `None` when the local
    /// key is unset.
    fn init_query(&self, local: &Model) -> Result<Option<Query>>;

    /// Runs [`init_query`](Self::init_query).
    fn get_results(&self, local: &Model) -> Result<Loaded>;

    /// Links `other` to `local`, saving whichever side holds the key.
    fn attach(&self, local: &mut Model, other: &mut Model) -> Result<bool>;

    /// Unlinks `other`, or every related model when `None`.
    fn detach(&self, local: &mut Model, other: Option<&mut Model>) -> Result<bool>;

    /// The type a new related model is created as.
    fn target_type(&self, local: &Model) -> Result<ModelType>;

    /// Saves `other`, pending changes included, and attaches it inside one
    /// transaction level.
    fn save(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        in_scope(|| Ok(other.save()? && self.attach(local, other)?))
    }

    /// Creates a related model from `values` and attaches it. Check
    /// [`Model::is_persisted`] on the result for the outcome.
    fn create(&self, local: &mut Model, values: Row) -> Result<Model> {
        let mut other = Model::new(&self.target_type(local)?)?;
        other.fill(values)?;
        self.save(local, &mut other)?;
        Ok(other)
    }
}

/// A relation resolved from a relation property.
#[derive(Debug, Clone)]
pub enum Relation {
    BelongsTo(BelongsTo),
    HasOne(HasOne),
    HasMany(HasMany),
    BelongsToMany(BelongsToMany),
    Polymorphic(Polymorphic),
}

impl Relation {
    /// The relation declared as `name` on `local`'s type.
    pub fn for_model(local: &Model, name: &str) -> Result<Self> {
        let info = local.definition().relation(name).cloned().ok_or_else(|| {
            Error::config(format!("unknown relation `{}` on {}", name, local.model_type()))
        })?;
        Self::from_info(info)
    }

    pub fn from_info(info: RelationInfo) -> Result<Self> {
        Ok(match info.kind {
            RelationKind::BelongsTo => {
                let foreign = registry::resolve_type(&info.target)?;
                Relation::BelongsTo(BelongsTo::new(info, foreign))
            }
            RelationKind::HasOne => {
                let foreign = registry::resolve_type(&info.target)?;
                Relation::HasOne(HasOne::new(info, foreign))
            }
            RelationKind::HasMany => {
                let foreign = registry::resolve_type(&info.target)?;
                Relation::HasMany(HasMany::new(info, foreign))
            }
            RelationKind::BelongsToMany => {
                let foreign = registry::resolve_type(&info.target)?;
                Relation::BelongsToMany(BelongsToMany::new(info, foreign))
            }
            RelationKind::Polymorphic => Relation::Polymorphic(Polymorphic::new(info)),
        })
    }

    pub fn kind(&self) -> RelationKind {
        self.info().kind
    }

    /// Deletes the related rows (pivot rows for many-to-many) whose ids are
    /// not in `ids`.
    ///
    /// Supported by has-one, has-many and belongs-to-many relations.
    pub fn sync(&self, local: &mut Model, ids: Vec<Value>) -> Result<bool> {
        match self {
            Relation::HasOne(relation) => relation.sync(local, ids),
            Relation::HasMany(relation) => relation.sync(local, ids),
            Relation::BelongsToMany(relation) => relation.sync(local, ids),
            Relation::BelongsTo(_) | Relation::Polymorphic(_) => Err(Error::config(format!(
                "relation `{}` ({}) does not support sync",
                self.info().name,
                self.kind()
            ))),
        }
    }

    fn inner(&self) -> &dyn Relationship {
        match self {
            Relation::BelongsTo(relation) => relation,
            Relation::HasOne(relation) => relation,
            Relation::HasMany(relation) => relation,
            Relation::BelongsToMany(relation) => relation,
            Relation::Polymorphic(relation) => relation,
        }
    }
}

impl Relationship for Relation {
    fn info(&self) -> &RelationInfo {
        self.inner().info()
    }

    fn init_query(&self, local: &Model) -> Result<Option<Query>> {
        self.inner().init_query(local)
    }

    fn get_results(&self, local: &Model) -> Result<Loaded> {
        self.inner().get_results(local)
    }

    fn attach(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        self.inner().attach(local, other)
    }

    fn detach(&self, local: &mut Model, other: Option<&mut Model>) -> Result<bool> {
        self.inner().detach(local, other)
    }

    fn target_type(&self, local: &Model) -> Result<ModelType> {
        self.inner().target_type(local)
    }

    fn save(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        self.inner().save(local, other)
    }

    fn create(&self, local: &mut Model, values: Row) -> Result<Model> {
        self.inner().create(local, values)
    }
}

/// Runs `step` inside one transaction level and rolls it back when the step
/// reports `false`. An error drops the scope, which rolls back too.
pub(crate) fn in_scope(step: impl FnOnce() -> Result<bool>) -> Result<bool> {
    let tx = TransactionScope::begin(true)?;
    if !step()? {
        tx.rollback()?;
        return Ok(false);
    }
    tx.commit()?;
    Ok(true)
}

/// The value of `column` on `local`, or an error naming the relation when
/// it is unset. Attaching needs a key to write.
fn required_key(local: &Model, column: &str, relation: &str) -> Result<Value> {
    let key = local.raw_value(column);
    if key.is_null() {
        return Err(Error::invalid_state(
            local.model_type().name(),
            format!("save the model before attaching to `{}`", relation),
        ));
    }
    Ok(key)
}

/// The single identity property of `ty`.
pub(crate) fn single_id(ty: &ModelType) -> Result<String> {
    let entry = registry::register(ty)?;
    match entry.definition().id_properties() {
        [single] => Ok(single.clone()),
        _ => Err(Error::config(format!(
            "{} has a composite identity and cannot be the target of this relation",
            ty
        ))),
    }
}
