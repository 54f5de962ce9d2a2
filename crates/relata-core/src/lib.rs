//! Core types for Relata.
//!
//! `relata-core` is the **leaf layer** of the workspace. It holds everything
//! the engine needs that does not touch storage or the process-wide model
//! registries.
//!
//! # Role In The Architecture
//!
//! - **Data model**: [`Value`] and [`Row`] carry property values between models,
//!   queries and drivers.
//! - **Schema**: [`Property`] declarations are frozen into a [`Definition`] per
//!   model type and memoized by the [`DefinitionRegistry`].
//! - **Validation**: the rule pipeline in [`validate`] checks and normalizes a
//!   single value at a time.
//! - **Events**: the generic prioritized [`Dispatcher`] with explicit
//!   [`DispatchOutcome`]s.
//! - **Clauses**: storage-agnostic [`Condition`], [`Sort`] and [`Join`]
//!   descriptors with reference in-memory semantics.
//!
//! Most applications should use the `relata` facade; reach for `relata-core`
//! directly when writing drivers or custom validation rules.

pub mod cast;
pub mod clause;
pub mod definition;
pub mod error;
pub mod events;
pub mod identifiers;
pub mod property;
pub mod relationship;
pub mod translate;
pub mod validate;
pub mod value;

pub use clause::{Condition, Direction, Join, Operator, Sort, compare_values};
pub use definition::{
    CREATED_AT, DELETED_AT, Definition, DefinitionOptions, DefinitionRegistry, ID, UPDATED_AT,
    definitions,
};
pub use error::{
    ConfigError, DriverError, Error, Errors, Operation, Result, ValidationError,
    ValidationFailure,
};
pub use events::{
    BUILTIN_PRIORITY, DEFAULT_PRIORITY, DispatchOutcome, Dispatcher, LifecycleEvent, Listener,
    ListenerId, Propagation,
};
pub use property::{Mutability, Property, PropertyType};
pub use relationship::{MorphInfo, RelationInfo, RelationKind, RelationSpec};
pub use translate::{PhraseTable, Translator};
pub use validate::{
    NoContext, Rule, RuleChain, RuleContext, RuleFailure, RuleOptions, ValidationContext,
    register_rule,
};
pub use value::{Row, Value};
