//! Batched eager loading.
//!
//! For each eager relation the hydrator collects the distinct non-null keys
//! of the whole batch and resolves them with one query, so a result set of N
//! models with R eager relations costs `1 + R` queries instead of `1 + N * R`.
//! These queries are unpaged, so the bound holds however many rows match.
//! Polymorphic relations need one query per distinct target type.
//!
//! Every model of the batch ends up with the relation resolved: a missing
//! match is `Loaded::One(None)` or an empty `Loaded::Many`, never an
//! unresolved slot.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use relata_core::{Error, RelationInfo, RelationKind, Result, Value};

use crate::model::{Loaded, Model};
use crate::query::Query;
use crate::registry::{self, TypeEntry};
use crate::relation::single_id;

pub(crate) struct Hydrator<'a> {
    entry: &'a TypeEntry,
}

impl<'a> Hydrator<'a> {
    pub(crate) fn new(entry: &'a TypeEntry) -> Self {
        Self { entry }
    }

    /// Resolves the relations `names` on every model of `models`.
    pub(crate) fn hydrate(&self, names: &[String], models: &mut [Model]) -> Result<()> {
        for name in names {
            let info = self.entry.definition().relation(name).ok_or_else(|| {
                Error::config(format!(
                    "cannot eager-load unknown relation `{}` on {}",
                    name,
                    self.entry.model_type()
                ))
            })?;
            tracing::debug!(
                model = %self.entry.model_type(),
                relation = %name,
                kind = %info.kind,
                batch = models.len(),
                "eager loading relation"
            );
            match info.kind {
                RelationKind::BelongsTo | RelationKind::HasOne | RelationKind::HasMany => {
                    keyed(info, models)?
                }
                RelationKind::BelongsToMany => belongs_to_many(info, models)?,
                RelationKind::Polymorphic => polymorphic(info, models)?,
            }
        }
        Ok(())
    }
}

/// Distinct non-null values of `column` across `models`, in first-seen order.
fn distinct_keys<'m>(models: impl IntoIterator<Item = &'m Model>, column: &str) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    models
        .into_iter()
        .map(|model| model.raw_value(column))
        .filter(|value| value.index_key().is_some_and(|key| seen.insert(key)))
        .collect()
}

/// Groups `found` by the key in `column`.
fn group_by(found: Vec<Model>, column: &str) -> HashMap<String, Vec<Model>> {
    let mut groups: HashMap<String, Vec<Model>> = HashMap::new();
    for model in found {
        if let Some(key) = model.raw_value(column).index_key() {
            groups.entry(key).or_default().push(model);
        }
    }
    groups
}

fn resolve_empty(info: &RelationInfo, models: &mut [Model]) {
    for model in models {
        model.set_loaded(&info.name, empty(info.kind));
    }
}

fn empty(kind: RelationKind) -> Loaded {
    if kind.is_single() {
        Loaded::One(None)
    } else {
        Loaded::Many(Vec::new())
    }
}

/// Attaches each model's group, looked up by the model's `local_key`.
fn attach_groups(
    info: &RelationInfo,
    models: &mut [Model],
    local_key: &str,
    groups: &HashMap<String, Vec<Model>>,
) {
    for model in models {
        let group = model
            .raw_value(local_key)
            .index_key()
            .and_then(|key| groups.get(&key));
        let loaded = if info.kind.is_single() {
            Loaded::One(group.and_then(|g| g.first()).cloned().map(Box::new))
        } else {
            Loaded::Many(group.cloned().unwrap_or_default())
        };
        model.set_loaded(&info.name, loaded);
    }
}

/// Belongs-to and has-one/has-many: the local key of each model matches
/// the target's foreign key.
fn keyed(info: &RelationInfo, models: &mut [Model]) -> Result<()> {
    let keys = distinct_keys(models.iter(), &info.local_key);
    if keys.is_empty() {
        resolve_empty(info, models);
        return Ok(());
    }
    let target = registry::resolve_type(&info.target)?;
    let found = Query::new(target)
        .where_in(&info.foreign_key, keys)
        .unpaged()
        .execute()?;
    attach_groups(info, models, &info.local_key, &group_by(found, &info.foreign_key));
    Ok(())
}

/// One joined query over the pivot; each related model carries the pivot's
/// local key as `{pivot}.{local_key}`.
fn belongs_to_many(info: &RelationInfo, models: &mut [Model]) -> Result<()> {
    let Some(model) = models.first() else {
        return Ok(());
    };
    let local_id = single_id(model.model_type())?;
    let keys = distinct_keys(models.iter(), &local_id);
    if keys.is_empty() {
        resolve_empty(info, models);
        return Ok(());
    }

    let target = registry::resolve_type(&info.target)?;
    let target_id = single_id(&target)?;
    let pivot = info.pivot.as_deref().unwrap_or_default();
    let pivot_local = format!("{}.{}", pivot, info.local_key);
    let found = Query::new(target)
        .join(pivot, target_id, &info.foreign_key)
        .where_in(&pivot_local, keys)
        .unpaged()
        .execute()?;
    attach_groups(info, models, &local_id, &group_by(found, &pivot_local));
    Ok(())
}

/// One query per distinct target type present in the batch.
fn polymorphic(info: &RelationInfo, models: &mut [Model]) -> Result<()> {
    let Some(morph) = info.morph.as_ref() else {
        return Err(Error::config(format!(
            "polymorphic relation `{}` has no type mapping",
            info.name
        )));
    };

    // type name -> indexes of the models pointing at it
    let mut by_type: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, model) in models.iter().enumerate() {
        let discriminator = model.raw_value(&morph.type_column);
        if let Some(type_name) = discriminator.as_str().and_then(|d| morph.type_for(d)) {
            by_type.entry(type_name).or_default().push(index);
        }
    }

    let mut resolved: HashMap<usize, Model> = HashMap::new();
    for (type_name, indexes) in &by_type {
        let keys = distinct_keys(indexes.iter().map(|&i| &models[i]), &info.local_key);
        if keys.is_empty() {
            continue;
        }
        let target = registry::resolve_type(type_name)?;
        let groups = group_by(
            Query::new(target)
                .where_in(&info.foreign_key, keys)
                .unpaged()
                .execute()?,
            &info.foreign_key,
        );
        for &index in indexes {
            let matched = models[index]
                .raw_value(&info.local_key)
                .index_key()
                .and_then(|key| groups.get(&key))
                .and_then(|group| group.first());
            if let Some(matched) = matched {
                resolved.insert(index, matched.clone());
            }
        }
    }

    for (index, model) in models.iter_mut().enumerate() {
        let loaded = Loaded::One(resolved.remove(&index).map(Box::new));
        model.set_loaded(&info.name, loaded);
    }
    Ok(())
}
