//! Relationship metadata.
//!
//! Relations are declared on a property as a [`RelationSpec`] naming the
//! target type(s). When the owning type's definition is built, every spec is
//! resolved into a [`RelationInfo`] with all keys filled in from the naming
//! conventions in [`crate::identifiers`]. The engine only ever works with
//! resolved metadata.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;
use crate::identifiers;

/// The five relation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// The local row holds the foreign key: `Person.team` → `Team`.
    BelongsTo,
    /// The foreign row holds the key; at most one match.
    HasOne,
    /// The foreign rows hold the key.
    HasMany,
    /// Many-to-many through a pivot table.
    BelongsToMany,
    /// Belongs-to whose target type is chosen per row by a discriminator column.
    Polymorphic,
}

impl RelationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::BelongsToMany => "belongs_to_many",
            RelationKind::Polymorphic => "polymorphic",
        }
    }

    /// Parses the declared kind name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "belongs_to" => Some(RelationKind::BelongsTo),
            "has_one" => Some(RelationKind::HasOne),
            "has_many" => Some(RelationKind::HasMany),
            "belongs_to_many" => Some(RelationKind::BelongsToMany),
            "polymorphic" => Some(RelationKind::Polymorphic),
            _ => None,
        }
    }

    /// Whether the relation resolves to at most one model.
    pub const fn is_single(self) -> bool {
        matches!(
            self,
            RelationKind::BelongsTo | RelationKind::HasOne | RelationKind::Polymorphic
        )
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relation as declared on a property. Unset keys are derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSpec {
    /// Declared kind. `None` (or an unknown `kind_name`) is rejected at registration.
    pub kind: Option<RelationKind>,
    /// Raw kind name when declared by string.
    pub kind_name: Option<String>,
    /// Target type name. Empty for polymorphic relations.
    pub target: String,
    pub local_key: Option<String>,
    pub foreign_key: Option<String>,
    pub pivot_table: Option<String>,
    /// Polymorphic discriminator value → type name.
    pub morph_map: BTreeMap<String, String>,
}

impl RelationSpec {
    pub fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            target: target.into(),
            ..Self::default()
        }
    }

    /// Declares a relation by kind name, validated at registration.
    pub fn named(kind: &str, target: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::parse(kind),
            kind_name: Some(kind.to_string()),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn belongs_to(target: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, target)
    }

    pub fn has_one(target: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, target)
    }

    pub fn has_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, target)
    }

    pub fn belongs_to_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsToMany, target)
    }

    /// A polymorphic relation; register targets with [`RelationSpec::morph`].
    pub fn polymorphic() -> Self {
        Self::new(RelationKind::Polymorphic, "")
    }

    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = Some(key.into());
        self
    }

    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot_table = Some(table.into());
        self
    }

    /// Maps a discriminator value to a target type name.
    pub fn morph(mut self, discriminator: impl Into<String>, target: impl Into<String>) -> Self {
        self.morph_map.insert(discriminator.into(), target.into());
        self
    }

    /// Every type name this relation can resolve to.
    pub fn target_names(&self) -> Vec<&str> {
        if self.kind == Some(RelationKind::Polymorphic) {
            self.morph_map.values().map(String::as_str).collect()
        } else {
            vec![self.target.as_str()]
        }
    }

    /// Resolves all keys for the relation declared as `property` on `owner`.
    pub fn resolve(&self, owner: &str, property: &str) -> Result<RelationInfo, ConfigError> {
        let Some(kind) = self.kind else {
            let declared = self.kind_name.as_deref().unwrap_or("<none>");
            return Err(ConfigError::for_model(
                owner,
                format!("relation `{}` has unsupported kind `{}`", property, declared),
            ));
        };

        if kind != RelationKind::Polymorphic && self.target.is_empty() {
            return Err(ConfigError::for_model(
                owner,
                format!("relation `{}` does not name a target type", property),
            ));
        }

        let info = match kind {
            RelationKind::BelongsTo => RelationInfo {
                name: property.to_string(),
                kind,
                target: self.target.clone(),
                local_key: self
                    .local_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", property)),
                foreign_key: self.foreign_key.clone().unwrap_or_else(|| "id".to_string()),
                pivot: None,
                morph: None,
            },
            RelationKind::HasOne | RelationKind::HasMany => RelationInfo {
                name: property.to_string(),
                kind,
                target: self.target.clone(),
                local_key: self.local_key.clone().unwrap_or_else(|| "id".to_string()),
                foreign_key: self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| identifiers::foreign_key(owner)),
                pivot: None,
                morph: None,
            },
            RelationKind::BelongsToMany => RelationInfo {
                name: property.to_string(),
                kind,
                target: self.target.clone(),
                local_key: self
                    .local_key
                    .clone()
                    .unwrap_or_else(|| identifiers::foreign_key(owner)),
                foreign_key: self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| identifiers::foreign_key(&self.target)),
                pivot: Some(
                    self.pivot_table
                        .clone()
                        .unwrap_or_else(|| identifiers::pivot_table(owner, &self.target)),
                ),
                morph: None,
            },
            RelationKind::Polymorphic => {
                if self.morph_map.is_empty() {
                    return Err(ConfigError::for_model(
                        owner,
                        format!("polymorphic relation `{}` has an empty type mapping", property),
                    ));
                }
                RelationInfo {
                    name: property.to_string(),
                    kind,
                    target: String::new(),
                    local_key: self
                        .local_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", property)),
                    foreign_key: self.foreign_key.clone().unwrap_or_else(|| "id".to_string()),
                    pivot: None,
                    morph: Some(MorphInfo {
                        type_column: format!("{}_type", property),
                        map: self.morph_map.clone(),
                    }),
                }
            }
        };
        Ok(info)
    }
}

/// Discriminator metadata for polymorphic relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphInfo {
    /// Local column holding the discriminator.
    pub type_column: String,
    /// Discriminator value → type name.
    pub map: BTreeMap<String, String>,
}

impl MorphInfo {
    pub fn type_for(&self, discriminator: &str) -> Option<&str> {
        self.map.get(discriminator).map(String::as_str)
    }

    /// Reverse lookup used when attaching a model of a known type.
    pub fn discriminator_for(&self, type_name: &str) -> Option<&str> {
        self.map
            .iter()
            .find(|(_, target)| target.as_str() == type_name)
            .map(|(key, _)| key.as_str())
    }
}

/// A fully resolved relation.
///
/// Key meaning per kind:
///
/// | kind | `local_key` | `foreign_key` |
/// |---|---|---|
/// | belongs-to, polymorphic | column on the local row | column on the target |
/// | has-one, has-many | column on the local row | column on the target |
/// | belongs-to-many | pivot column pointing at the local row | pivot column pointing at the target |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    /// Property name the relation is declared on.
    pub name: String,
    pub kind: RelationKind,
    /// Target type name. Empty for polymorphic relations.
    pub target: String,
    pub local_key: String,
    pub foreign_key: String,
    /// Pivot table for belongs-to-many.
    pub pivot: Option<String>,
    pub morph: Option<MorphInfo>,
}

impl RelationInfo {
    /// Local columns whose reassignment invalidates the cached relation.
    pub fn owning_columns(&self) -> Vec<&str> {
        match self.kind {
            RelationKind::BelongsTo => vec![self.local_key.as_str()],
            RelationKind::Polymorphic => {
                let mut cols = vec![self.local_key.as_str()];
                if let Some(morph) = &self.morph {
                    cols.push(morph.type_column.as_str());
                }
                cols
            }
            _ => Vec::new(),
        }
    }
}
