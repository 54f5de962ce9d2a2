//! Property definitions.
//!
//! A [`Property`] describes one attribute of a model type: its semantic type,
//! how it may be written, how it is validated and (for relation properties)
//! which other type it points at. Properties are assembled with builder
//! methods and frozen once built into a [`Definition`](crate::Definition).

use std::fmt;

use crate::identifiers;
use crate::relationship::RelationSpec;
use crate::validate::{Rule, RuleChain};
use crate::value::Value;

/// Semantic type of a property; drives casting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PropertyType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    /// Stored as text, held in memory as [`Value::Timestamp`].
    Date,
    /// Stored as JSON text.
    Array,
    /// Stored as JSON text.
    Object,
    /// Text restricted to a fixed set of choices.
    Enum,
}

impl PropertyType {
    pub const fn as_str(self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::Array => "array",
            PropertyType::Object => "object",
            PropertyType::Enum => "enum",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a property may be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mutability {
    /// Never written except with its default value.
    Immutable,
    /// Written on create, ignored on update.
    MutableCreateOnly,
    /// Written on create and update.
    #[default]
    Mutable,
}

impl Mutability {
    pub const fn writable_on_update(self) -> bool {
        matches!(self, Mutability::Mutable)
    }
}

/// Metadata about a single model property.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub ty: PropertyType,
    pub mutability: Mutability,
    /// `Null` is an accepted value and skips validation.
    pub nullable: bool,
    /// Must hold a non-empty value on create.
    pub required: bool,
    /// No two rows of the type may share the value.
    pub unique: bool,
    /// `None` means no default, which is different from a `Null` default.
    pub default: Option<Value>,
    pub validate: RuleChain,
    pub relation: Option<RelationSpec>,
    /// Encrypted before reaching the driver.
    pub encrypted: bool,
    /// `false` for computed properties that are never stored.
    pub persisted: bool,
    /// Excluded from `to_array`.
    pub hidden: bool,
    /// Human title used in messages. Derived from the name when absent.
    pub title: Option<String>,
    /// Allowed values of an [`PropertyType::Enum`] property.
    pub choices: Vec<String>,
}

impl Property {
    /// Create a mutable, non-nullable property with no default.
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            mutability: Mutability::Mutable,
            nullable: false,
            required: false,
            unique: false,
            default: None,
            validate: RuleChain::new(),
            relation: None,
            encrypted: false,
            persisted: true,
            hidden: false,
            title: None,
            choices: Vec::new(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Date)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Array)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Object)
    }

    /// An enum property; the `enum` rule is added when the definition is built.
    pub fn enumeration<I, S>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut property = Self::new(name, PropertyType::Enum);
        property.choices = choices.into_iter().map(Into::into).collect();
        property
    }

    /// A relation property. It is never stored itself; its keys are.
    pub fn relation(name: impl Into<String>, spec: RelationSpec) -> Self {
        let mut property = Self::new(name, PropertyType::Object);
        property.relation = Some(spec);
        property.persisted = false;
        property.nullable = true;
        property
    }

    /// A computed property, produced by an accessor and never stored.
    pub fn computed(name: impl Into<String>, ty: PropertyType) -> Self {
        let mut property = Self::new(name, ty);
        property.persisted = false;
        property
    }

    pub fn mutability(mut self, mutability: Mutability) -> Self {
        self.mutability = mutability;
        self
    }

    pub fn immutable(self) -> Self {
        self.mutability(Mutability::Immutable)
    }

    pub fn create_only(self) -> Self {
        self.mutability(Mutability::MutableCreateOnly)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the default from an optional value; `None` clears it.
    pub fn default_opt(mut self, value: Option<Value>) -> Self {
        self.default = value;
        self
    }

    /// Appends rules parsed from `"rule:opt=v|rule2"`.
    pub fn validate(mut self, spec: &str) -> Self {
        for rule in RuleChain::parse(spec).rules() {
            self.validate.push(rule.clone());
        }
        self
    }

    /// Appends a rule built in code.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.validate.push(rule);
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Whether this property holds a relation rather than a column.
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Whether the property maps to a stored column.
    pub fn is_stored(&self) -> bool {
        self.persisted && self.relation.is_none()
    }

    /// The title used in messages.
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| identifiers::humanize(&self.name))
    }

    /// Casts a raw value to this property's type.
    pub fn cast(&self, value: Value) -> Value {
        self.ty.cast(value)
    }
}
