//! Shared fixtures for relata integration tests.
//!
//! The engine keeps its driver and type registries in process-wide state, so
//! every test takes the [`isolate`] guard: it serializes the tests of one
//! binary, resets the registries and installs a fresh [`MemoryDriver`].

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relata::prelude::*;
use relata::{MemoryDriver, registry};

static SERIAL: Mutex<()> = Mutex::new(());

/// Exclusive access to the process-wide registries for one test.
pub struct Isolated {
    pub driver: Arc<MemoryDriver>,
    _guard: MutexGuard<'static, ()>,
}

pub fn isolate() -> Isolated {
    let guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    registry::reset();
    let driver = Arc::new(MemoryDriver::new());
    registry::set_driver(driver.clone());
    Isolated {
        driver,
        _guard: guard,
    }
}

// ============================================================================
// Model types
// ============================================================================

pub struct Team;

impl Entity for Team {
    const NAME: &'static str = "Team";

    fn schema() -> Schema {
        Schema::new()
            .property(Property::string("name").required())
            .has_many("members", Person::model_type())
            .has_one("captain", Captain::model_type())
    }
}

pub struct Person;

impl Entity for Person {
    const NAME: &'static str = "Person";

    fn schema() -> Schema {
        Schema::new()
            .property(Property::string("name").required())
            .property(Property::string("email").validate("email").unique().nullable())
            .property(Property::integer("age").nullable())
            .belongs_to("team", Team::model_type())
            .belongs_to_many("groups", Group::model_type())
    }
}

pub struct Group;

impl Entity for Group {
    const NAME: &'static str = "Group";

    fn schema() -> Schema {
        Schema::new().property(Property::string("name").required())
    }
}

/// The has-one side of [`Team`].
pub struct Captain;

impl Entity for Captain {
    const NAME: &'static str = "Captain";

    fn schema() -> Schema {
        Schema::new()
            .property(Property::string("name"))
            .property(Property::integer("team_id").nullable())
    }
}

/// Points at either a [`Person`] or a [`Team`].
pub struct Comment;

impl Entity for Comment {
    const NAME: &'static str = "Comment";

    fn schema() -> Schema {
        Schema::new()
            .property(Property::string("body"))
            .morph_to(
                "subject",
                [("person", Person::model_type()), ("team", Team::model_type())],
            )
    }
}

/// A soft-deleting, timestamped, transactional type.
pub struct Article;

impl Entity for Article {
    const NAME: &'static str = "Article";

    fn schema() -> Schema {
        Schema::new()
            .property(Property::string("title").required())
            .property(Property::integer("views").default(0))
            .timestamps()
            .soft_delete()
            .transactions()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Creates a model of `E` and asserts it persisted.
pub fn create<E: Entity + 'static>(data: Row) -> Model {
    let model = E::create(data).expect("create");
    assert!(
        model.is_persisted(),
        "{} was not persisted: {:?}",
        E::NAME,
        model.errors().messages()
    );
    model
}
