use relata_core::{RelationInfo, Result, Value};

use super::Relationship;
use crate::entity::ModelType;
use crate::model::{Loaded, Model};
use crate::query::Query;

/// The local row holds the target's key in `local_key`.
#[derive(Debug, Clone)]
pub struct BelongsTo {
    info: RelationInfo,
    foreign: ModelType,
}

impl BelongsTo {
    pub fn new(info: RelationInfo, foreign: ModelType) -> Self {
        Self { info, foreign }
    }
}

impl Relationship for BelongsTo {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn init_query(&self, local: &Model) -> Result<Option<Query>> {
        let key = local.raw_value(&self.info.local_key);
        if key.is_null() {
            return Ok(None);
        }
        Ok(Some(
            Query::new(self.foreign.clone()).where_eq(&self.info.foreign_key, key),
        ))
    }

    fn get_results(&self, local: &Model) -> Result<Loaded> {
        let found = match self.init_query(local)? {
            Some(query) => query.first()?,
            None => None,
        };
        Ok(Loaded::One(found.map(Box::new)))
    }

    fn attach(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        if !other.is_persisted() && !other.save()? {
            return Ok(false);
        }
        local.stage(&self.info.local_key, other.raw_value(&self.info.foreign_key));
        if !local.save()? {
            return Ok(false);
        }
        local.set_loaded(&self.info.name, Loaded::One(Some(Box::new(other.clone()))));
        Ok(true)
    }

    fn detach(&self, local: &mut Model, _other: Option<&mut Model>) -> Result<bool> {
        local.stage(&self.info.local_key, Value::Null);
        if !local.is_persisted() {
            return Ok(true);
        }
        local.save()
    }

    fn target_type(&self, _local: &Model) -> Result<ModelType> {
        Ok(self.foreign.clone())
    }
}
