//! Model definitions and the process-wide definition registry.
//!
//! A [`Definition`] is the frozen, name-ordered property set of one model type.
//! Building one merges the declared properties with everything the type's
//! options imply:
//!
//! - `id` (integer, writable on create only) when the type uses the default
//!   single identity
//! - `created_at` / `updated_at` when timestamps are enabled
//! - `deleted_at` (nullable, default `Null`) when soft delete is enabled
//! - the companion key column of every belongs-to relation and the
//!   `_type` / `_id` pair of every polymorphic relation, unless declared
//!
//! Definitions are built once per type and cached in a [`DefinitionRegistry`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{ConfigError, Result};
use crate::identifiers;
use crate::property::{Property, PropertyType};
use crate::relationship::{RelationInfo, RelationKind};
use crate::validate::Rule;
use crate::value::Value;

/// Default identity property.
pub const ID: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

const TIMESTAMP_RULES: &str = "timestamp|db_timestamp";

/// Type-level options that shape a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionOptions {
    /// Storage table. Defaults to `{snake(type)}s`.
    pub table: Option<String>,
    /// Identity properties. Empty means the default single `id`.
    pub id_properties: Vec<String>,
    pub timestamps: bool,
    pub soft_delete: bool,
}

/// The complete property set of one model type.
#[derive(Debug, Clone)]
pub struct Definition {
    model: String,
    table: String,
    properties: BTreeMap<String, Property>,
    id_properties: Vec<String>,
    relations: BTreeMap<String, RelationInfo>,
    timestamps: bool,
    soft_delete: bool,
}

impl Definition {
    /// Builds a definition, deriving implicit properties and relation keys.
    pub fn build(
        model: impl Into<String>,
        declared: Vec<Property>,
        options: DefinitionOptions,
    ) -> std::result::Result<Self, ConfigError> {
        let model = model.into();
        let mut properties = BTreeMap::new();
        for property in declared {
            if property.name.is_empty() {
                return Err(ConfigError::for_model(&model, "property with an empty name"));
            }
            let name = property.name.clone();
            if properties.insert(name.clone(), property).is_some() {
                return Err(ConfigError::for_model(
                    &model,
                    format!("property `{}` is declared twice", name),
                ));
            }
        }

        let id_properties = if options.id_properties.is_empty() {
            properties
                .entry(ID.to_string())
                .or_insert_with(|| Property::integer(ID).create_only());
            vec![ID.to_string()]
        } else {
            for name in &options.id_properties {
                if !properties.contains_key(name) {
                    return Err(ConfigError::for_model(
                        &model,
                        format!("identity property `{}` is not declared", name),
                    ));
                }
            }
            if options.id_properties.len() > 1 {
                for name in &options.id_properties {
                    if let Some(property) = properties.get_mut(name) {
                        property.required = true;
                    }
                }
            }
            options.id_properties.clone()
        };

        if options.timestamps {
            for name in [CREATED_AT, UPDATED_AT] {
                properties.entry(name.to_string()).or_insert_with(|| {
                    Property::date(name).nullable().validate(TIMESTAMP_RULES)
                });
            }
        }

        if options.soft_delete {
            properties.entry(DELETED_AT.to_string()).or_insert_with(|| {
                Property::date(DELETED_AT)
                    .nullable()
                    .default(Value::Null)
                    .validate(TIMESTAMP_RULES)
            });
        }

        let mut relations = BTreeMap::new();
        let mut companions = Vec::new();
        for property in properties.values() {
            let Some(spec) = &property.relation else {
                continue;
            };
            let info = spec.resolve(&model, &property.name)?;
            match info.kind {
                RelationKind::BelongsTo => {
                    companions.push(Property::integer(&info.local_key).nullable());
                }
                RelationKind::Polymorphic => {
                    companions.push(Property::integer(&info.local_key).nullable());
                    if let Some(morph) = &info.morph {
                        companions.push(Property::string(&morph.type_column).nullable());
                    }
                }
                _ => {}
            }
            relations.insert(property.name.clone(), info);
        }
        for companion in companions {
            properties.entry(companion.name.clone()).or_insert(companion);
        }

        for property in properties.values_mut() {
            if property.unique && !property.validate.contains("unique") {
                property.validate.push(Rule::new("unique"));
            }
            if property.ty == PropertyType::Enum
                && !property.choices.is_empty()
                && !property.validate.contains("enum")
            {
                property
                    .validate
                    .push(Rule::new("enum").option("choices", property.choices.join(",")));
            }
            let unknown = property.validate.unknown_rules();
            if !unknown.is_empty() {
                return Err(ConfigError::for_model(
                    &model,
                    format!(
                        "property `{}` uses unknown validation rule(s): {}",
                        property.name,
                        unknown.join(", ")
                    ),
                ));
            }
        }

        let table = options
            .table
            .clone()
            .unwrap_or_else(|| identifiers::table_name(&model));

        tracing::debug!(
            model = %model,
            table = %table,
            properties = properties.len(),
            relations = relations.len(),
            "built model definition"
        );

        Ok(Self {
            model,
            table,
            properties,
            id_properties,
            relations,
            timestamps: options.timestamps,
            soft_delete: options.soft_delete,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Properties in name order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Properties backed by a stored column.
    pub fn stored(&self) -> impl Iterator<Item = &Property> {
        self.properties.values().filter(|p| p.is_stored())
    }

    pub fn required(&self) -> impl Iterator<Item = &Property> {
        self.properties.values().filter(|p| p.required)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn id_properties(&self) -> &[String] {
        &self.id_properties
    }

    pub fn has_composite_id(&self) -> bool {
        self.id_properties.len() > 1
    }

    pub fn relation(&self, name: &str) -> Option<&RelationInfo> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationInfo> {
        self.relations.values()
    }

    /// Relations whose cached result depends on the local `column`.
    pub fn relations_owning<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a str> {
        self.relations
            .values()
            .filter(move |info| info.owning_columns().contains(&column))
            .map(|info| info.name.as_str())
    }

    pub fn has_timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn has_soft_delete(&self) -> bool {
        self.soft_delete
    }
}

/// Memoizes one [`Definition`] per model type name.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: RwLock<HashMap<String, Arc<Definition>>>,
    builds: AtomicUsize,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached definition of `model`, if built.
    pub fn get(&self, model: &str) -> Option<Arc<Definition>> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }

    /// Returns the cached definition, building it on first use.
    ///
    /// `build` runs without the registry lock held. When two threads race,
    /// the first stored definition wins and both receive it.
    pub fn get_or_build<F>(&self, model: &str, build: F) -> Result<Arc<Definition>>
    where
        F: FnOnce() -> std::result::Result<Definition, ConfigError>,
    {
        if let Some(definition) = self.get(model) {
            return Ok(definition);
        }
        let built = Arc::new(build()?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        let mut definitions = self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(definitions
            .entry(model.to_string())
            .or_insert(built)
            .clone())
    }

    pub fn len(&self) -> usize {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of definitions built since creation or the last reset.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Drops every cached definition.
    pub fn reset(&self) {
        self.definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.builds.store(0, Ordering::Relaxed);
    }
}

/// The process-wide definition registry.
pub fn definitions() -> &'static DefinitionRegistry {
    static REGISTRY: OnceLock<DefinitionRegistry> = OnceLock::new();
    REGISTRY.get_or_init(DefinitionRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::RelationSpec;

    fn person() -> std::result::Result<Definition, ConfigError> {
        Definition::build(
            "Person",
            vec![
                Property::string("name").required(),
                Property::string("email").unique().validate("email"),
                Property::enumeration("role", ["admin", "member"]),
                Property::relation("team", RelationSpec::belongs_to("Team")),
                Property::relation("posts", RelationSpec::has_many("Post")),
            ],
            DefinitionOptions {
                timestamps: true,
                soft_delete: true,
                ..DefinitionOptions::default()
            },
        )
    }

    #[test]
    fn test_derived_properties_are_injected() {
        let def = person().unwrap();
        assert_eq!(def.table(), "persons");
        assert_eq!(def.id_properties(), ["id"]);
        assert!(def.contains("id"));
        assert!(def.contains("created_at"));
        assert!(def.contains("updated_at"));
        assert!(def.contains("team_id"));
        assert!(!def.contains("person_id"));

        let deleted_at = def.get("deleted_at").unwrap();
        assert!(deleted_at.nullable);
        assert_eq!(deleted_at.default, Some(Value::Null));

        let id = def.get("id").unwrap();
        assert_eq!(id.mutability, crate::property::Mutability::MutableCreateOnly);
    }

    #[test]
    fn test_properties_are_sorted_by_name() {
        let def = person().unwrap();
        let names: Vec<&str> = def.properties().map(|p| p.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_chains_are_normalized() {
        let def = person().unwrap();
        assert_eq!(def.get("email").unwrap().validate.names(), vec!["email", "unique"]);
        assert_eq!(def.get("role").unwrap().validate.names(), vec!["enum"]);
    }

    #[test]
    fn test_relations_resolved() {
        let def = person().unwrap();
        assert_eq!(def.relation("team").unwrap().local_key, "team_id");
        assert_eq!(def.relation("posts").unwrap().foreign_key, "person_id");
        assert_eq!(def.relations_owning("team_id").collect::<Vec<_>>(), vec!["team"]);
        assert_eq!(def.relations_owning("id").count(), 0);
    }

    #[test]
    fn test_declared_companion_is_kept() {
        let def = Definition::build(
            "Post",
            vec![
                Property::string("author_id").create_only(),
                Property::relation("author", RelationSpec::belongs_to("Person")),
            ],
            DefinitionOptions::default(),
        )
        .unwrap();
        let key = def.get("author_id").unwrap();
        assert_eq!(key.ty, PropertyType::String);
        assert!(!key.nullable);
    }

    #[test]
    fn test_composite_identity() {
        let def = Definition::build(
            "Membership",
            vec![Property::integer("person_id"), Property::integer("group_id")],
            DefinitionOptions {
                table: Some("group_person".into()),
                id_properties: vec!["person_id".into(), "group_id".into()],
                ..DefinitionOptions::default()
            },
        )
        .unwrap();
        assert!(def.has_composite_id());
        assert!(!def.contains("id"));
        assert!(def.get("person_id").unwrap().required);

        let err = Definition::build(
            "Broken",
            vec![Property::integer("a")],
            DefinitionOptions {
                id_properties: vec!["a".into(), "b".into()],
                ..DefinitionOptions::default()
            },
        )
        .unwrap_err();
        assert!(err.message.contains("`b`"));
    }

    #[test]
    fn test_configuration_errors() {
        let err = Definition::build(
            "Person",
            vec![Property::relation("team", RelationSpec::named("owns", "Team"))],
            DefinitionOptions::default(),
        )
        .unwrap_err();
        assert!(err.message.contains("unsupported kind"));

        let err = Definition::build(
            "Person",
            vec![Property::string("name").validate("no_such_rule")],
            DefinitionOptions::default(),
        )
        .unwrap_err();
        assert!(err.message.contains("no_such_rule"));

        let err = Definition::build(
            "Person",
            vec![Property::string("name"), Property::integer("name")],
            DefinitionOptions::default(),
        )
        .unwrap_err();
        assert!(err.message.contains("declared twice"));
    }

    #[test]
    fn test_registry_builds_once() {
        let registry = DefinitionRegistry::new();
        let first = registry.get_or_build("Person", person).unwrap();
        let second = registry
            .get_or_build("Person", || panic!("must not rebuild"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.build_count(), 1);

        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.get("Person").is_none());
    }

    #[test]
    fn test_registry_propagates_build_errors() {
        let registry = DefinitionRegistry::new();
        let err = registry
            .get_or_build("Broken", || Err(ConfigError::new("nope")))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert!(registry.get("Broken").is_none());
    }
}
