//! Relata: an active-record ORM engine.
//!
//! Models are dynamically valued records of statically declared types. The
//! engine persists them through a pluggable [`Driver`], runs every write
//! through a lifecycle of cancelable events and validation, and resolves
//! relations between types lazily or in batch.
//!
//! # Role In The Architecture
//!
//! - **Types**: an [`Entity`] declares a [`Schema`]; registration freezes it
//!   into a [`Definition`] with a dispatcher holding the built-in behaviors.
//! - **Models**: [`Model`] layers staged values over persisted ones and owns
//!   the create / update / delete state machine.
//! - **Queries**: [`Query`] builds storage-agnostic selections, executes them
//!   through the driver and eager-loads relations with one query per relation.
//! - **Relations**: [`relation`] implements belongs-to, has-one, has-many,
//!   belongs-to-many and polymorphic relations behind one contract.
//! - **Process state**: [`registry`] holds the driver and the optional
//!   collaborators, [`transaction`] the nesting depth.
//!
//! # Example
//!
//! ```ignore
//! use relata::prelude::*;
//!
//! struct Team;
//!
//! impl Entity for Team {
//!     const NAME: &'static str = "Team";
//!
//!     fn schema() -> Schema {
//!         Schema::new()
//!             .property(Property::string("name").required())
//!             .has_many("members", Person::model_type())
//!     }
//! }
//!
//! registry::set_driver(Arc::new(MemoryDriver::new()));
//!
//! let mut team = Team::new()?;
//! team.create(row! { "name" => "Core" })?;
//! let teams = Team::query().with("members").execute()?;
//! ```

pub mod acl;
mod behaviors;
pub mod cache;
pub mod driver;
pub mod encrypt;
pub mod entity;
mod hydrator;
pub mod memory;
pub mod model;
pub mod n1;
pub mod query;
pub mod registry;
pub mod relation;
pub mod transaction;

pub use acl::{PermissionPolicy, Requester, RequesterProvider};
pub use cache::{MemoryCache, ModelCache};
pub use driver::Driver;
pub use encrypt::Encrypter;
pub use entity::{Accessor, Behaviors, Entity, ModelType, Mutator, Schema};
pub use memory::{DriverCall, MemoryDriver};
pub use model::{Identity, Loaded, Model};
pub use n1::{LazyLoadStats, LazyLoadTracker};
pub use query::{DEFAULT_LIMIT, MAX_LIMIT, Query};
pub use relation::{Relation, Relationship};

pub use relata_core::validate::verify_password;
pub use relata_core::{
    ConfigError, Definition, DefinitionOptions, Direction, DispatchOutcome, DriverError, Error,
    Errors, LifecycleEvent, ListenerId, Mutability, Operation, Operator, PhraseTable, Property,
    PropertyType, Propagation, RelationKind, RelationSpec, Result, Row, Rule, RuleContext,
    RuleOptions, Translator, ValidationError, Value, register_rule, row,
};

/// The types most applications need.
pub mod prelude {
    pub use crate::registry;
    pub use crate::{
        Direction, Entity, Error, Identity, LifecycleEvent, MemoryDriver, Model, ModelType,
        Operator, Propagation, Property, Query, RelationSpec, Requester, Result, Row, Schema,
        Value, row,
    };
    pub use std::sync::Arc;
}
