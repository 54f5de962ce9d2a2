use std::collections::BTreeSet;

use relata_core::{Error, Operator, RelationInfo, Result, Row, Value};

use super::{Relationship, required_key, single_id};
use crate::entity::ModelType;
use crate::model::{Loaded, Model};
use crate::query::Query;
use crate::transaction::TransactionScope;

/// Links through rows of a pivot table holding `local_key` (pointing at the
/// local model) and `foreign_key` (pointing at the target).
///
/// Pivot rows are models of a synthetic pivot type, so they go through the
/// regular lifecycle. Related models read through the pivot expose its
/// columns as `{pivot}.{column}`.
#[derive(Debug, Clone)]
pub struct BelongsToMany {
    info: RelationInfo,
    foreign: ModelType,
    pivot: ModelType,
}

impl BelongsToMany {
    pub fn new(info: RelationInfo, foreign: ModelType) -> Self {
        let pivot = ModelType::pivot(
            info.pivot.as_deref().unwrap_or_default(),
            &info.local_key,
            &info.foreign_key,
        );
        Self {
            info,
            foreign,
            pivot,
        }
    }

    pub fn pivot_type(&self) -> &ModelType {
        &self.pivot
    }

    pub fn pivot_table(&self) -> &str {
        self.info.pivot.as_deref().unwrap_or_default()
    }

    fn local_id(&self, local: &Model) -> Result<Value> {
        let column = single_id(local.model_type())?;
        required_key(local, &column, &self.info.name)
    }

    fn pivot_rows(&self, local_id: &Value) -> Query {
        Query::new(self.pivot.clone()).where_eq(&self.info.local_key, local_id.clone())
    }

    fn insert_pivot(&self, local_id: &Value, foreign_id: Value) -> Result<bool> {
        let mut row = Model::new(&self.pivot)?;
        let mut values = Row::new();
        values.insert(self.info.local_key.clone(), local_id.clone());
        values.insert(self.info.foreign_key.clone(), foreign_id);
        row.create(values)
    }

    /// Makes the pivot rows of `local` point at exactly `ids`.
    pub fn sync(&self, local: &mut Model, ids: Vec<Value>) -> Result<bool> {
        let local_id = self.local_id(local)?;
        let tx = TransactionScope::begin(true)?;

        let mut stale = self.pivot_rows(&local_id);
        if !ids.is_empty() {
            stale = stale.where_op(
                &self.info.foreign_key,
                Operator::NotIn,
                Value::Array(ids.clone()),
            );
        }
        stale.delete()?;

        let existing: BTreeSet<String> = self
            .pivot_rows(&local_id)
            .all()?
            .iter()
            .filter_map(|row| row.raw_value(&self.info.foreign_key).index_key())
            .collect();
        let mut seen = BTreeSet::new();
        for id in ids {
            let Some(key) = id.index_key() else {
                continue;
            };
            if existing.contains(&key) || !seen.insert(key) {
                continue;
            }
            if !self.insert_pivot(&local_id, id)? {
                tx.rollback()?;
                return Ok(false);
            }
        }

        tx.commit()?;
        local.forget_relation(&self.info.name);
        Ok(true)
    }
}

impl Relationship for BelongsToMany {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn init_query(&self, local: &Model) -> Result<Option<Query>> {
        let local_id = local.id_value();
        if local_id.is_null() {
            return Ok(None);
        }
        let target_id = single_id(&self.foreign)?;
        let pivot = self.pivot_table();
        Ok(Some(
            Query::new(self.foreign.clone())
                .join(pivot, target_id, &self.info.foreign_key)
                .where_eq(format!("{}.{}", pivot, self.info.local_key), local_id),
        ))
    }

    fn get_results(&self, local: &Model) -> Result<Loaded> {
        let found = match self.init_query(local)? {
            Some(query) => query.all()?,
            None => Vec::new(),
        };
        Ok(Loaded::Many(found))
    }

    fn attach(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        let local_id = self.local_id(local)?;
        if !other.is_persisted() && !other.save()? {
            return Ok(false);
        }
        let foreign_id = other.id_value();
        if foreign_id.is_null() {
            return Err(Error::invalid_state(
                other.model_type().name(),
                "attached model has no identity",
            ));
        }

        let linked = self
            .pivot_rows(&local_id)
            .where_eq(&self.info.foreign_key, foreign_id.clone())
            .count()?;
        let attached = linked > 0 || self.insert_pivot(&local_id, foreign_id)?;
        local.forget_relation(&self.info.name);
        Ok(attached)
    }

    fn detach(&self, local: &mut Model, other: Option<&mut Model>) -> Result<bool> {
        let local_id = self.local_id(local)?;
        let mut rows = self.pivot_rows(&local_id);
        if let Some(other) = other {
            rows = rows.where_eq(&self.info.foreign_key, other.id_value());
        }
        rows.delete()?;
        local.forget_relation(&self.info.name);
        Ok(true)
    }

    fn target_type(&self, _local: &Model) -> Result<ModelType> {
        Ok(self.foreign.clone())
    }
}
