//! The create / update / delete state machine.
//!
//! Every write follows the same order: pre-event (cancelable), validation,
//! driver call, in-memory state update, post-event (cancelable), commit.
//! Refusals return `Ok(false)` with errors collected on the model; driver
//! failures return `Err` after the open transaction level has been rolled
//! back. The `*_or_fail` variants turn refusals into
//! [`Error::Validation`].

use std::collections::BTreeMap;
use std::sync::Arc;

use relata_core::cast::{format_db_timestamp, now_timestamp, to_storage};
use relata_core::{
    DELETED_AT, DispatchOutcome, Error, LifecycleEvent, Mutability, Property, Result, Row,
    RuleContext, RuleOptions, ValidationError, ValidationFailure, Value,
};

use super::{Identity, Model};
use crate::driver::Driver;
use crate::entity::ModelType;
use crate::registry;
use crate::transaction::TransactionScope;

/// Model state captured before a post-event, restored when the event
/// cancels a transactional write.
struct Snapshot {
    id: Option<Identity>,
    values: Row,
    unsaved: Row,
    loaded: bool,
    persisted: bool,
}

impl Model {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Loads a model by its single identity value.
    pub fn find(ty: &ModelType, id: impl Into<Value>) -> Result<Option<Model>> {
        let mut model = Model::with_id(ty, id)?;
        Ok(if model.refresh()? { Some(model) } else { None })
    }

    pub fn find_or_fail(ty: &ModelType, id: impl Into<Value>) -> Result<Model> {
        let id = id.into();
        Model::find(ty, id.clone())?.ok_or_else(|| Error::NotFound {
            model: ty.name().to_string(),
            id: id.to_string(),
        })
    }

    /// Reloads the persisted values, reading through the cache when one is
    /// installed. Staged values are kept. Returns `false` when there is no
    /// identity or the row no longer exists.
    #[tracing::instrument(level = "debug", skip(self), fields(model = %self.model_type()))]
    pub fn refresh(&mut self) -> Result<bool> {
        if self.id.is_none() {
            return Ok(false);
        }

        let cache = registry::cache_for(&self.entry);
        let key = self.cache_key();
        if let Some(values) = cache.as_ref().and_then(|(cache, _)| cache.get(&key)) {
            tracing::trace!(key = %key, "cache hit");
            self.values = values;
            self.mark_loaded();
            return Ok(true);
        }

        let driver = registry::driver()?;
        let Some(row) = driver.load(self)? else {
            return Ok(false);
        };
        self.values.clear();
        self.apply_stored(&row)?;
        self.mark_loaded();

        if let Some((cache, ttl)) = cache {
            cache.set(&key, &self.values, ttl);
        }
        Ok(true)
    }

    fn mark_loaded(&mut self) {
        self.loaded = true;
        self.persisted = true;
        for slot in self.relations.values_mut() {
            slot.take();
        }
    }

    pub(crate) fn cache_key(&self) -> String {
        match &self.id {
            Some(id) => format!("{}.{}", self.model_type().name(), id),
            None => self.model_type().name().to_string(),
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Persists a new model after mass-assigning `data`.
    ///
    /// Mass-assigning a refused key and creating a model that already has an
    /// identity are errors.
    #[tracing::instrument(level = "debug", skip(self, data), fields(model = %self.model_type()))]
    pub fn create(&mut self, data: Row) -> Result<bool> {
        if self.id.is_some() {
            return Err(Error::invalid_state(
                self.model_type().name(),
                "cannot create a model that already has an identity",
            ));
        }
        self.fill(data)?;
        self.errors.clear();

        let driver = registry::driver()?;
        let tx = TransactionScope::begin(self.entry.behaviors().uses_transactions())?;

        if self.cancelled(LifecycleEvent::Creating, "create") {
            tx.rollback()?;
            return Ok(false);
        }

        let Some(insert) = self.validated_values(true)? else {
            tx.rollback()?;
            return Ok(false);
        };
        let stored = self.storage_row(&insert)?;
        if !driver.create(self, &stored)? {
            tx.rollback()?;
            return Ok(false);
        }
        let identity = self.created_identity(driver.as_ref(), &insert)?;

        let snapshot = self.snapshot();
        self.merge(insert);
        for (name, value) in identity.to_row(self.definition().id_properties()) {
            self.values.insert(name, value);
        }
        self.id = Some(identity);
        self.unsaved.clear();
        self.loaded = true;
        self.persisted = true;

        if self.cancelled(LifecycleEvent::Created, "create") {
            self.abandon(tx, snapshot)?;
            return Ok(false);
        }
        tx.commit()?;
        self.write_cache();

        tracing::info!(
            model = self.model_type().name(),
            table = self.table(),
            id = %self.id_value(),
            "Created model"
        );
        Ok(true)
    }

    /// Updates a persisted model with `data` plus previously staged values.
    ///
    /// Only mutable properties are written. Nothing to write succeeds
    /// without events or a driver call.
    #[tracing::instrument(level = "debug", skip(self, data), fields(model = %self.model_type()))]
    pub fn set(&mut self, data: Row) -> Result<bool> {
        if self.id.is_none() {
            return Err(Error::invalid_state(
                self.model_type().name(),
                "cannot update a model without an identity",
            ));
        }
        self.fill(data)?;
        if !self.has_writable_changes() {
            return Ok(true);
        }
        self.errors.clear();

        let driver = registry::driver()?;
        let tx = TransactionScope::begin(self.entry.behaviors().uses_transactions())?;

        if self.cancelled(LifecycleEvent::Updating, "update") {
            tx.rollback()?;
            return Ok(false);
        }

        let Some(update) = self.validated_values(false)? else {
            tx.rollback()?;
            return Ok(false);
        };
        if !update.is_empty() {
            let stored = self.storage_row(&update)?;
            if !driver.update(self, &stored)? {
                tx.rollback()?;
                return Ok(false);
            }
        }

        let snapshot = self.snapshot();
        self.merge(update);
        self.unsaved.clear();

        if self.cancelled(LifecycleEvent::Updated, "update") {
            self.abandon(tx, snapshot)?;
            return Ok(false);
        }
        tx.commit()?;
        self.write_cache();

        tracing::info!(
            model = self.model_type().name(),
            table = self.table(),
            id = %self.id_value(),
            "Updated model"
        );
        Ok(true)
    }

    /// Deletes the model. Soft-delete types stamp `deleted_at` instead and
    /// stay persisted.
    #[tracing::instrument(level = "debug", skip(self), fields(model = %self.model_type()))]
    pub fn delete(&mut self) -> Result<bool> {
        if self.id.is_none() {
            return Err(Error::invalid_state(
                self.model_type().name(),
                "cannot delete a model without an identity",
            ));
        }
        self.errors.clear();

        let driver = registry::driver()?;
        let tx = TransactionScope::begin(self.entry.behaviors().uses_transactions())?;

        if self.cancelled(LifecycleEvent::Deleting, "delete") {
            tx.rollback()?;
            return Ok(false);
        }

        let soft = self.definition().has_soft_delete();
        let now = now_timestamp();
        let deleted = if soft {
            let stamp = format_db_timestamp(now).map_or(Value::Timestamp(now), Value::Text);
            let mut stored = Row::new();
            stored.insert(DELETED_AT.to_string(), stamp);
            driver.update(self, &stored)?
        } else {
            driver.delete(self)?
        };
        if !deleted {
            tx.rollback()?;
            return Ok(false);
        }

        let snapshot = self.snapshot();
        if soft {
            self.values
                .insert(DELETED_AT.to_string(), Value::Timestamp(now));
            self.unsaved.remove(DELETED_AT);
        } else {
            self.persisted = false;
        }

        if self.cancelled(LifecycleEvent::Deleted, "delete") {
            self.abandon(tx, snapshot)?;
            return Ok(false);
        }
        tx.commit()?;

        if let Some((cache, _)) = registry::cache_for(&self.entry) {
            cache.delete(&self.cache_key());
        }
        tracing::info!(
            model = self.model_type().name(),
            table = self.table(),
            id = %self.id_value(),
            soft,
            "Deleted model"
        );
        Ok(true)
    }

    /// Clears `deleted_at` on a soft-deleted model through the update path.
    pub fn restore(&mut self) -> Result<bool> {
        if !self.is_deleted() {
            return Err(Error::invalid_state(
                self.model_type().name(),
                "only soft-deleted models can be restored",
            ));
        }
        self.stage(DELETED_AT, Value::Null);
        self.set(Row::new())
    }

    /// Creates or updates, depending on whether the model has an identity.
    pub fn save(&mut self) -> Result<bool> {
        if self.id.is_none() {
            self.create(Row::new())
        } else {
            self.set(Row::new())
        }
    }

    pub fn create_or_fail(&mut self, data: Row) -> Result<()> {
        if self.create(data)? {
            Ok(())
        } else {
            Err(self.failure("create"))
        }
    }

    pub fn set_or_fail(&mut self, data: Row) -> Result<()> {
        if self.set(data)? {
            Ok(())
        } else {
            Err(self.failure("update"))
        }
    }

    pub fn delete_or_fail(&mut self) -> Result<()> {
        if self.delete()? {
            Ok(())
        } else {
            Err(self.failure("delete"))
        }
    }

    pub fn save_or_fail(&mut self) -> Result<()> {
        let operation = if self.id.is_none() { "create" } else { "update" };
        if self.save()? {
            Ok(())
        } else {
            Err(self.failure(operation))
        }
    }

    fn failure(&self, operation: &'static str) -> Error {
        Error::Validation(ValidationFailure {
            model: self.model_type().name().to_string(),
            operation,
            messages: self.errors.messages(),
        })
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// Dispatches `event`; returns whether a listener stopped it.
    ///
    /// A stop that left no error on the model records a `cancelled` error,
    /// using the listener's reason as the message when it gave one.
    fn cancelled(&mut self, event: LifecycleEvent, operation: &str) -> bool {
        let dispatcher = self.entry.dispatcher();
        let DispatchOutcome::Stopped { reason } = dispatcher.dispatch(event, self) else {
            return false;
        };

        tracing::debug!(
            model = self.model_type().name(),
            event = event.as_str(),
            reason = reason.as_deref().unwrap_or(""),
            "lifecycle event stopped"
        );
        if self.errors.is_empty() {
            let message = reason.unwrap_or_else(|| {
                let params = BTreeMap::from([
                    ("model".to_string(), self.model_type().name().to_string()),
                    ("operation".to_string(), operation.to_string()),
                ]);
                registry::translate("cancelled", None, &params)
            });
            self.errors.push(ValidationError::new("cancelled", message));
        }
        true
    }

    /// Collects the values to write, validating each one.
    ///
    /// On create every stored property with a staged value or a default
    /// takes part; immutable properties only with their default value, and
    /// required properties without either are reported missing. On update
    /// only staged mutable properties take part. Returns `None` after
    /// recording the errors when anything failed.
    fn validated_values(&mut self, creating: bool) -> Result<Option<Row>> {
        let definition = Arc::clone(self.entry.definition());
        let mut accepted = Row::new();
        let mut failed = false;

        for property in definition.stored() {
            let name = property.name.as_str();
            let staged = self.unsaved.get(name).cloned();
            let value = if creating {
                match staged.or_else(|| property.default.clone()) {
                    Some(value) => value,
                    None => {
                        if property.required {
                            self.push_rule_error(property, "required", &RuleOptions::new());
                            failed = true;
                        }
                        continue;
                    }
                }
            } else {
                match staged {
                    Some(value) => value,
                    None => continue,
                }
            };

            let writable = match property.mutability {
                Mutability::Immutable => {
                    creating && property.default.as_ref().is_some_and(|d| d.loosely_eq(&value))
                }
                Mutability::MutableCreateOnly => creating,
                Mutability::Mutable => true,
            };
            if !writable {
                continue;
            }

            if value.is_null() && property.nullable {
                accepted.insert(name.to_string(), value);
                continue;
            }
            if property.required && value.is_empty() {
                self.push_rule_error(property, "required", &RuleOptions::new());
                failed = true;
                continue;
            }

            let mut value = value;
            let failure = property
                .validate
                .validate(&mut value, &RuleContext::new(name, &*self))?;
            match failure {
                Some(failure) => {
                    self.push_rule_error(property, &failure.rule, &failure.options);
                    failed = true;
                }
                None => {
                    accepted.insert(name.to_string(), value);
                }
            }
        }

        Ok(if failed { None } else { Some(accepted) })
    }

    fn push_rule_error(&mut self, property: &Property, rule: &str, options: &RuleOptions) {
        let title = property.display_title();
        let mut params = options.to_params();
        params.insert("field".to_string(), property.name.clone());
        params.insert("field_name".to_string(), title.clone());
        let message = registry::translate(
            &format!("validation.{}", rule),
            Some("validation.invalid"),
            &params,
        );
        self.errors.push(
            ValidationError::new(rule, message)
                .field(&property.name)
                .title(title)
                .params(params),
        );
    }

    fn has_writable_changes(&self) -> bool {
        self.unsaved.keys().any(|name| {
            self.definition()
                .get(name)
                .is_some_and(|p| p.is_stored() && p.mutability.writable_on_update())
        })
    }

    /// Converts validated values to their storage form: arrays and objects
    /// as JSON text, encrypted properties as ciphertext.
    fn storage_row(&self, values: &Row) -> Result<Row> {
        let definition = Arc::clone(self.entry.definition());
        let mut stored = Row::new();
        for (name, value) in values {
            let Some(property) = definition.get(name) else {
                continue;
            };
            let mut value = to_storage(property.ty, value.clone());
            if property.encrypted && !value.is_null() {
                let encrypter = self.require_encrypter(property)?;
                value = Value::Text(encrypter.encrypt(&value.to_string())?);
            }
            stored.insert(name.clone(), value);
        }
        Ok(stored)
    }

    fn created_identity(&self, driver: &dyn Driver, insert: &Row) -> Result<Identity> {
        let definition = Arc::clone(self.entry.definition());
        let ids = definition.id_properties();
        let cast = |name: &str, value: Value| match definition.get(name) {
            Some(property) => property.cast(value),
            None => value,
        };

        if let [single] = ids {
            let supplied = insert.get(single).filter(|v| !v.is_null()).cloned();
            let value = match supplied {
                Some(value) => value,
                None => driver.created_id(self, single)?,
            };
            return Ok(Identity::Single(cast(single.as_str(), value)));
        }
        Ok(Identity::Composite(
            ids.iter()
                .map(|name| {
                    let value = insert.get(name).cloned().unwrap_or(Value::Null);
                    (name.clone(), cast(name.as_str(), value))
                })
                .collect(),
        ))
    }

    /// Casts written values into the persisted layer.
    fn merge(&mut self, written: Row) {
        let definition = Arc::clone(self.entry.definition());
        for (name, value) in written {
            let value = match definition.get(&name) {
                Some(property) => property.cast(value),
                None => value,
            };
            self.values.insert(name, value);
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id.clone(),
            values: self.values.clone(),
            unsaved: self.unsaved.clone(),
            loaded: self.loaded,
            persisted: self.persisted,
        }
    }

    /// Rolls back after a cancelled post-event. When the write ran inside a
    /// transaction it is undone, so the in-memory state is reverted too.
    fn abandon(&mut self, tx: TransactionScope, snapshot: Snapshot) -> Result<()> {
        let transactional = tx.is_open();
        tx.rollback()?;
        if transactional {
            self.id = snapshot.id;
            self.values = snapshot.values;
            self.unsaved = snapshot.unsaved;
            self.loaded = snapshot.loaded;
            self.persisted = snapshot.persisted;
        }
        Ok(())
    }

    fn write_cache(&self) {
        if let Some((cache, ttl)) = registry::cache_for(&self.entry) {
            cache.set(&self.cache_key(), &self.values, ttl);
        }
    }
}
