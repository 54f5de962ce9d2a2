//! Access control.
//!
//! A type with a [`PermissionPolicy`] checks `create`, `edit` and `delete`
//! permissions in built-in listeners on `creating`, `updating` and `deleting`.
//! The acting [`Requester`] comes from the process-wide
//! [`RequesterProvider`](crate::registry::set_requester_provider). A denial
//! records a `no_permission` error on the model and stops the operation.
//!
//! Results are cached on the model instance per permission and requester.
//! Without a requester every check is denied, unless the instance bypasses
//! permissions with [`Model::grant_all_permissions`].

use std::fmt;

use relata_core::{
    BUILTIN_PRIORITY, Dispatcher, LifecycleEvent, Propagation, ValidationError, Value,
};

use crate::model::Model;
use crate::registry;

/// The party performing an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    /// Requester type, e.g. `"User"` or `"ApiKey"`.
    pub kind: String,
    pub id: Value,
}

impl Requester {
    pub fn new(kind: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub(crate) fn cache_key(&self) -> (String, String) {
        (self.kind.clone(), self.id.index_key().unwrap_or_default())
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Supplies the current requester.
pub trait RequesterProvider: Send + Sync {
    fn requester(&self) -> Option<Requester>;
}

impl<F> RequesterProvider for F
where
    F: Fn() -> Option<Requester> + Send + Sync,
{
    fn requester(&self) -> Option<Requester> {
        self()
    }
}

/// Decides whether `requester` holds `permission` on `model`.
pub trait PermissionPolicy: Send + Sync {
    fn allows(&self, permission: &str, requester: &Requester, model: &Model) -> bool;
}

impl<F> PermissionPolicy for F
where
    F: Fn(&str, &Requester, &Model) -> bool + Send + Sync,
{
    fn allows(&self, permission: &str, requester: &Requester, model: &Model) -> bool {
        self(permission, requester, model)
    }
}

pub(crate) fn install(dispatcher: &Dispatcher<Model>) {
    for (event, permission) in [
        (LifecycleEvent::Creating, "create"),
        (LifecycleEvent::Updating, "edit"),
        (LifecycleEvent::Deleting, "delete"),
    ] {
        dispatcher.listen(event, BUILTIN_PRIORITY, move |model: &mut Model| {
            check(model, permission)
        });
    }
}

fn check(model: &mut Model, permission: &str) -> Propagation {
    let allowed = match registry::current_requester() {
        Some(requester) => model.can(permission, &requester),
        None => model.permissions_bypassed(),
    };
    if allowed {
        return Propagation::Continue;
    }

    tracing::info!(
        model = model.model_type().name(),
        permission = permission,
        "permission denied"
    );
    let message = registry::translate("no_permission", None, &Default::default());
    model
        .errors_mut()
        .push(ValidationError::new("no_permission", message));
    Propagation::stop("no_permission")
}
