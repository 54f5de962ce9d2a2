use relata_core::{Operator, RelationInfo, Result, Value};

use super::{Relationship, in_scope, required_key, single_id};
use crate::entity::ModelType;
use crate::model::{Loaded, Model};
use crate::query::Query;
use crate::transaction::TransactionScope;

/// The other model holds `local`'s key in `foreign_key`, and at most one
/// other model is related.
#[derive(Debug, Clone)]
pub struct HasOne {
    info: RelationInfo,
    foreign: ModelType,
}

/// The other models hold `local`'s key in `foreign_key`.
#[derive(Debug, Clone)]
pub struct HasMany {
    info: RelationInfo,
    foreign: ModelType,
}

impl HasOne {
    pub fn new(info: RelationInfo, foreign: ModelType) -> Self {
        Self { info, foreign }
    }

    pub fn sync(&self, local: &mut Model, ids: Vec<Value>) -> Result<bool> {
        sync(&self.info, &self.foreign, local, ids)
    }
}

impl HasMany {
    pub fn new(info: RelationInfo, foreign: ModelType) -> Self {
        Self { info, foreign }
    }

    pub fn sync(&self, local: &mut Model, ids: Vec<Value>) -> Result<bool> {
        sync(&self.info, &self.foreign, local, ids)
    }
}

impl Relationship for HasOne {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn init_query(&self, local: &Model) -> Result<Option<Query>> {
        Ok(init_query(&self.info, &self.foreign, local))
    }

    fn get_results(&self, local: &Model) -> Result<Loaded> {
        let found = match self.init_query(local)? {
            Some(query) => query.first()?,
            None => None,
        };
        Ok(Loaded::One(found.map(Box::new)))
    }

    fn attach(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        if !attach(&self.info, local, other)? {
            return Ok(false);
        }
        local.set_loaded(&self.info.name, Loaded::One(Some(Box::new(other.clone()))));
        Ok(true)
    }

    fn detach(&self, local: &mut Model, other: Option<&mut Model>) -> Result<bool> {
        detach(&self.info, &self.foreign, local, other)
    }

    // Attaching stages the key on `other` and saves it with its other
    // pending changes in one write.
    fn save(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        in_scope(|| self.attach(local, other))
    }

    fn target_type(&self, _local: &Model) -> Result<ModelType> {
        Ok(self.foreign.clone())
    }
}

impl Relationship for HasMany {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn init_query(&self, local: &Model) -> Result<Option<Query>> {
        Ok(init_query(&self.info, &self.foreign, local))
    }

    fn get_results(&self, local: &Model) -> Result<Loaded> {
        let found = match self.init_query(local)? {
            Some(query) => query.all()?,
            None => Vec::new(),
        };
        Ok(Loaded::Many(found))
    }

    fn attach(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        let attached = attach(&self.info, local, other)?;
        if attached {
            local.forget_relation(&self.info.name);
        }
        Ok(attached)
    }

    fn detach(&self, local: &mut Model, other: Option<&mut Model>) -> Result<bool> {
        detach(&self.info, &self.foreign, local, other)
    }

    // Attaching stages the key on `other` and saves it with its other
    // pending changes in one write.
    fn save(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        in_scope(|| self.attach(local, other))
    }

    fn target_type(&self, _local: &Model) -> Result<ModelType> {
        Ok(self.foreign.clone())
    }
}

fn init_query(info: &RelationInfo, foreign: &ModelType, local: &Model) -> Option<Query> {
    let key = local.raw_value(&info.local_key);
    if key.is_null() {
        return None;
    }
    Some(Query::new(foreign.clone()).where_eq(&info.foreign_key, key))
}

fn attach(info: &RelationInfo, local: &Model, other: &mut Model) -> Result<bool> {
    let key = required_key(local, &info.local_key, &info.name)?;
    other.stage(&info.foreign_key, key);
    other.save()
}

fn detach(
    info: &RelationInfo,
    foreign: &ModelType,
    local: &mut Model,
    other: Option<&mut Model>,
) -> Result<bool> {
    let detached = match other {
        Some(other) => {
            other.stage(&info.foreign_key, Value::Null);
            other.save()?
        }
        None => match init_query(info, foreign, local) {
            Some(query) => {
                let related = query.all()?;
                let tx = TransactionScope::begin(true)?;
                for mut model in related {
                    model.stage(&info.foreign_key, Value::Null);
                    if !model.save()? {
                        tx.rollback()?;
                        return Ok(false);
                    }
                }
                tx.commit()?;
                true
            }
            None => true,
        },
    };
    local.forget_relation(&info.name);
    Ok(detached)
}

/// Deletes the related models whose id is not in `ids`. An empty `ids`
/// deletes every related model.
fn sync(
    info: &RelationInfo,
    foreign: &ModelType,
    local: &mut Model,
    ids: Vec<Value>,
) -> Result<bool> {
    let key = required_key(local, &info.local_key, &info.name)?;
    let id_column = single_id(foreign)?;

    let mut stale = Query::new(foreign.clone()).where_eq(&info.foreign_key, key);
    if !ids.is_empty() {
        stale = stale.where_op(&id_column, Operator::NotIn, Value::Array(ids));
    }

    let tx = TransactionScope::begin(true)?;
    for mut model in stale.all()? {
        if !model.delete()? {
            tx.rollback()?;
            return Ok(false);
        }
    }
    tx.commit()?;
    local.forget_relation(&info.name);
    Ok(true)
}
