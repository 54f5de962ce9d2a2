//! Message translation.
//!
//! Validation messages are rendered from phrase keys such as
//! `validation.required` with `{{name}}` placeholders. A [`Translator`] may be
//! installed to localize them; when it has no phrase for a key, the built-in
//! English phrase is used.

use std::collections::{BTreeMap, HashMap};

/// Resolves phrase keys to message text.
pub trait Translator: Send + Sync {
    /// Returns the rendered phrase, or `None` when the key is unknown.
    fn translate(&self, key: &str, params: &BTreeMap<String, String>, locale: Option<&str>) -> Option<String>;
}

const DEFAULT_PHRASES: &[(&str, &str)] = &[
    ("validation.invalid", "{{field_name}} is invalid"),
    ("validation.required", "{{field_name}} is missing"),
    ("validation.string", "{{field_name}} must be a string of the right length"),
    ("validation.matching", "{{field_name}} must match"),
    ("validation.range", "{{field_name}} must be within the allowed range"),
    ("validation.numeric", "{{field_name}} must be a number"),
    ("validation.integer", "{{field_name}} must be an integer"),
    ("validation.boolean", "{{field_name}} must be true or false"),
    ("validation.email", "{{field_name}} must be a valid email address"),
    ("validation.url", "{{field_name}} must be a valid URL"),
    ("validation.ip", "{{field_name}} must be a valid IP address"),
    ("validation.alpha", "{{field_name}} may only contain letters"),
    ("validation.alpha_numeric", "{{field_name}} may only contain letters and numbers"),
    ("validation.alpha_dash", "{{field_name}} may only contain letters, numbers, dashes and underscores"),
    ("validation.enum", "{{field_name}} must be one of the allowed values"),
    ("validation.date", "{{field_name}} must be a date"),
    ("validation.timestamp", "{{field_name}} must be a date"),
    ("validation.db_timestamp", "{{field_name}} must be a date"),
    ("validation.password", "{{field_name}} must be at least {{min}} characters"),
    ("validation.pattern", "{{field_name}} has an invalid format"),
    ("validation.unique", "{{field_name}} has already been taken"),
    ("validation.callable", "{{field_name}} is invalid"),
    ("no_permission", "You do not have permission to do that"),
    ("cancelled", "{{model}} {{operation}} was cancelled"),
];

/// The built-in English phrase for `key`.
pub fn default_phrase(key: &str) -> Option<&'static str> {
    DEFAULT_PHRASES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, phrase)| *phrase)
}

/// Replaces every `{{name}}` with its parameter. Unknown placeholders stay.
pub fn render(template: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in params {
        out = out.replace(&format!("{{{{{}}}}}", name), value);
    }
    out
}

/// Renders `key` through `translator`, then the built-in phrases, then
/// `fallback` (itself looked up as a key), then the key itself.
pub fn translate_or_default(
    translator: Option<&dyn Translator>,
    key: &str,
    fallback: Option<&str>,
    params: &BTreeMap<String, String>,
    locale: Option<&str>,
) -> String {
    if let Some(message) = translator.and_then(|t| t.translate(key, params, locale)) {
        return message;
    }
    if let Some(phrase) = default_phrase(key) {
        return render(phrase, params);
    }
    if let Some(fallback) = fallback {
        if let Some(message) = translator.and_then(|t| t.translate(fallback, params, locale)) {
            return message;
        }
        if let Some(phrase) = default_phrase(fallback) {
            return render(phrase, params);
        }
    }
    key.to_string()
}

/// A translator backed by per-locale phrase tables.
#[derive(Debug, Clone, Default)]
pub struct PhraseTable {
    default_locale: String,
    phrases: HashMap<String, HashMap<String, String>>,
}

impl PhraseTable {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self {
            default_locale: default_locale.into(),
            phrases: HashMap::new(),
        }
    }

    pub fn phrase(
        mut self,
        locale: impl Into<String>,
        key: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.phrases
            .entry(locale.into())
            .or_default()
            .insert(key.into(), template.into());
        self
    }
}

impl Translator for PhraseTable {
    fn translate(&self, key: &str, params: &BTreeMap<String, String>, locale: Option<&str>) -> Option<String> {
        let locale = locale.unwrap_or(&self.default_locale);
        self.phrases
            .get(locale)
            .and_then(|table| table.get(key))
            .map(|template| render(template, params))
    }
}
