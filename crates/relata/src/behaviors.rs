//! Built-in lifecycle listeners.
//!
//! They are ordinary listeners registered at [`BUILTIN_PRIORITY`] when a type
//! is registered, so they run before application listeners at the default
//! priority.

use relata_core::cast::now_timestamp;
use relata_core::{
    BUILTIN_PRIORITY, CREATED_AT, DELETED_AT, Definition, Dispatcher, LifecycleEvent, Propagation,
    UPDATED_AT, Value,
};

use crate::acl;
use crate::entity::Behaviors;
use crate::model::Model;

pub(crate) fn install(dispatcher: &Dispatcher<Model>, definition: &Definition, behaviors: &Behaviors) {
    if behaviors.permissions().is_some() {
        acl::install(dispatcher);
    }
    if definition.has_timestamps() {
        install_timestamps(dispatcher);
    }
    if definition.has_soft_delete() {
        install_soft_delete(dispatcher);
    }
}

fn install_timestamps(dispatcher: &Dispatcher<Model>) {
    dispatcher.listen(LifecycleEvent::Creating, BUILTIN_PRIORITY, |model: &mut Model| {
        let now = Value::Timestamp(now_timestamp());
        if model.unsaved().get(CREATED_AT).is_none_or(Value::is_null) {
            model.stage(CREATED_AT, now.clone());
        }
        model.stage(UPDATED_AT, now);
        Propagation::Continue
    });
    dispatcher.listen(LifecycleEvent::Updating, BUILTIN_PRIORITY, |model: &mut Model| {
        model.stage(UPDATED_AT, Value::Timestamp(now_timestamp()));
        Propagation::Continue
    });
}

fn install_soft_delete(dispatcher: &Dispatcher<Model>) {
    dispatcher.listen(LifecycleEvent::Creating, BUILTIN_PRIORITY, |model: &mut Model| {
        if !model.unsaved().contains_key(DELETED_AT) {
            model.stage(DELETED_AT, Value::Null);
        }
        Propagation::Continue
    });
}
