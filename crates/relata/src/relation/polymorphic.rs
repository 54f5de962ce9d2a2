use relata_core::{Error, MorphInfo, RelationInfo, Result, Value};

use super::Relationship;
use crate::entity::ModelType;
use crate::model::{Loaded, Model};
use crate::query::Query;
use crate::registry;

/// A belongs-to whose target type is chosen per row by a discriminator
/// column. A discriminator missing from the type mapping resolves to no
/// model.
#[derive(Debug, Clone)]
pub struct Polymorphic {
    info: RelationInfo,
}

impl Polymorphic {
    pub fn new(info: RelationInfo) -> Self {
        Self { info }
    }

    fn morph(&self) -> Result<&MorphInfo> {
        self.info.morph.as_ref().ok_or_else(|| {
            Error::config(format!(
                "polymorphic relation `{}` has no type mapping",
                self.info.name
            ))
        })
    }

    /// The target type selected by `local`'s discriminator.
    pub fn target_of(&self, local: &Model) -> Result<Option<ModelType>> {
        let morph = self.morph()?;
        let discriminator = local.raw_value(&morph.type_column);
        let Some(type_name) = discriminator.as_str().and_then(|d| morph.type_for(d)) else {
            return Ok(None);
        };
        registry::resolve_type(type_name).map(Some)
    }
}

impl Relationship for Polymorphic {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn init_query(&self, local: &Model) -> Result<Option<Query>> {
        let key = local.raw_value(&self.info.local_key);
        if key.is_null() {
            return Ok(None);
        }
        Ok(self
            .target_of(local)?
            .map(|target| Query::new(target).where_eq(&self.info.foreign_key, key)))
    }

    fn get_results(&self, local: &Model) -> Result<Loaded> {
        let found = match self.init_query(local)? {
            Some(query) => query.first()?,
            None => None,
        };
        Ok(Loaded::One(found.map(Box::new)))
    }

    fn attach(&self, local: &mut Model, other: &mut Model) -> Result<bool> {
        let morph = self.morph()?;
        let Some(discriminator) = morph.discriminator_for(other.model_type().name()) else {
            return Err(Error::config(format!(
                "{} is not a target of relation `{}`",
                other.model_type(),
                self.info.name
            )));
        };
        let discriminator = discriminator.to_string();
        let type_column = morph.type_column.clone();

        if !other.is_persisted() && !other.save()? {
            return Ok(false);
        }
        local.stage(&type_column, discriminator);
        local.stage(&self.info.local_key, other.raw_value(&self.info.foreign_key));
        if !local.save()? {
            return Ok(false);
        }
        local.set_loaded(&self.info.name, Loaded::One(Some(Box::new(other.clone()))));
        Ok(true)
    }

    fn detach(&self, local: &mut Model, _other: Option<&mut Model>) -> Result<bool> {
        let type_column = self.morph()?.type_column.clone();
        local.stage(&type_column, Value::Null);
        local.stage(&self.info.local_key, Value::Null);
        if !local.is_persisted() {
            return Ok(true);
        }
        local.save()
    }

    fn target_type(&self, local: &Model) -> Result<ModelType> {
        self.target_of(local)?.ok_or_else(|| {
            Error::invalid_state(
                local.model_type().name(),
                format!(
                    "set `{}` to a mapped discriminator before creating through it",
                    self.morph().map(|m| m.type_column.as_str()).unwrap_or_default()
                ),
            )
        })
    }
}
