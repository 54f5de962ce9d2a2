//! Error types.
//!
//! Two channels exist and never mix:
//!
//! - [`Error`] is returned through `Result` for driver failures, misconfiguration
//!   and misuse of the API.
//! - [`ValidationError`]s are collected on the model ([`Errors`]) when a
//!   lifecycle operation is refused because the data is invalid, a listener
//!   cancelled it, or a permission check failed. Such operations return
//!   `Ok(false)`.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The storage operation a [`DriverError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Load,
    Update,
    Delete,
    Query,
    Aggregate,
    Transaction,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Load => "load",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Query => "query",
            Operation::Aggregate => "aggregate",
            Operation::Transaction => "transaction",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage failure reported by a driver.
#[derive(Debug)]
pub struct DriverError {
    pub operation: Operation,
    /// Model type name, or empty for connection-level failures.
    pub model: String,
    pub message: String,
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl DriverError {
    pub fn new(operation: Operation, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation,
            model: model.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.model.is_empty() {
            write!(f, "{} failed: {}", self.operation, self.message)
        } else {
            write!(f, "{} failed for {}: {}", self.operation, self.model, self.message)
        }
    }
}

/// Invalid model or engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Model type the problem was found on, if any.
    pub model: Option<String>,
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            model: None,
            message: message.into(),
        }
    }

    pub fn for_model(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}: {}", model, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A refused lifecycle operation, raised by the `*_or_fail` variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub model: String,
    pub operation: &'static str,
    pub messages: Vec<String>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to {} {}", self.operation, self.model)?;
        if !self.messages.is_empty() {
            write!(f, ": {}", self.messages.join(", "))?;
        }
        Ok(())
    }
}

/// The primary error type.
#[derive(Debug)]
pub enum Error {
    /// The storage driver failed.
    Driver(DriverError),
    /// No storage driver has been installed.
    NoDriver,
    /// Invalid definition or engine configuration.
    Config(ConfigError),
    /// A property outside the mass-assignment allow list (or inside the deny
    /// list) was supplied in bulk.
    MassAssignment { model: String, property: String },
    /// An operation was attempted in a state that does not permit it.
    InvalidState { model: String, message: String },
    /// A `*_or_fail` operation was refused.
    Validation(ValidationFailure),
    /// A `find_or_fail` lookup returned nothing.
    NotFound { model: String, id: String },
    /// JSON serialization failed.
    Serialization(serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError::new(message))
    }

    pub fn invalid_state(model: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidState {
            model: model.into(),
            message: message.into(),
        }
    }

    pub const fn is_no_driver(&self) -> bool {
        matches!(self, Error::NoDriver)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Driver(e) => write!(f, "driver error: {}", e),
            Error::NoDriver => write!(f, "no storage driver has been configured"),
            Error::Config(e) => write!(f, "configuration error: {}", e),
            Error::MassAssignment { model, property } => write!(
                f,
                "mass assignment of `{}` is not allowed on {}",
                property, model
            ),
            Error::InvalidState { model, message } => write!(f, "{}: {}", model, message),
            Error::Validation(e) => write!(f, "{}", e),
            Error::NotFound { model, id } => write!(f, "{} {} not found", model, id),
            Error::Serialization(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Driver(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn StdError + 'static)),
            Error::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Driver(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err)
    }
}

/// A single field-scoped validation error collected on a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Machine-readable code, usually the failing rule name.
    pub code: String,
    /// Property the error relates to, if any.
    pub field: Option<String>,
    /// Human-readable property title.
    pub title: Option<String>,
    /// Parameters substituted into the message template.
    pub params: BTreeMap<String, String>,
    /// Rendered message.
    pub message: String,
}

impl ValidationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            field: None,
            title: None,
            params: BTreeMap::new(),
            message: message.into(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The error collection carried by a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Errors {
    items: Vec<ValidationError>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.items.push(error);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.items.iter()
    }

    /// Errors attached to `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.items
            .iter()
            .filter(move |e| e.field.as_deref() == Some(field))
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.for_field(field).next().is_some()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.items.iter().any(|e| e.code == code)
    }

    pub fn codes(&self) -> Vec<&str> {
        self.items.iter().map(|e| e.code.as_str()).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.items.iter().map(|e| e.message.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new(Operation::Create, "Person", "disk full");
        assert_eq!(err.to_string(), "create failed for Person: disk full");
        let err = DriverError::new(Operation::Transaction, "", "no connection");
        assert_eq!(err.to_string(), "transaction failed: no connection");
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::other("boom");
        let err = Error::from(DriverError::new(Operation::Load, "Person", "read").with_source(io));
        assert!(StdError::source(&err).is_some());
        assert!(StdError::source(&Error::NoDriver).is_none());
    }

    #[test]
    fn test_validation_failure_display() {
        let failure = ValidationFailure {
            model: "Person".into(),
            operation: "create",
            messages: vec!["Name is missing".into(), "Email is invalid".into()],
        };
        assert_eq!(
            Error::Validation(failure).to_string(),
            "failed to create Person: Name is missing, Email is invalid"
        );
    }

    #[test]
    fn test_errors_collection() {
        let mut errors = Errors::new();
        errors.push(ValidationError::new("required", "Name is missing").field("name"));
        errors.push(ValidationError::new("email", "Email is invalid").field("email"));
        errors.push(ValidationError::new("no_permission", "denied"));

        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("name"));
        assert!(!errors.has_field("age"));
        assert!(errors.has_code("no_permission"));
        assert_eq!(errors.codes(), vec!["required", "email", "no_permission"]);

        errors.clear();
        assert!(errors.is_empty());
    }
}
