//! The validator pipeline.
//!
//! A property's validation is an ordered [`RuleChain`]. Each rule receives the
//! value mutably (rules such as `email`, `timestamp` or `password` normalize it),
//! its options and a [`RuleContext`] describing the owning model. The chain
//! stops at the first failing rule and reports it; its name becomes the
//! validation error code.
//!
//! Chains are usually parsed from the compact string form:
//!
//! ```
//! use relata_core::validate::RuleChain;
//!
//! let chain = RuleChain::parse("string:min=2:max=40|unique");
//! assert_eq!(chain.names(), vec!["string", "unique"]);
//! ```

mod rules;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use regex::Regex;

use crate::error::{ConfigError, Error, Result};
use crate::value::Value;

pub use rules::{BUILTIN_RULES, verify_password};

/// Access to the model being validated.
///
/// Implemented by the engine's model type; [`NoContext`] serves standalone use.
pub trait ValidationContext {
    /// Type name of the model.
    fn model_name(&self) -> &str;

    /// The currently persisted value of `property`, if the model is persisted.
    fn persisted_value(&self, property: &str) -> Option<Value>;

    /// Number of stored rows of the model's own type where `column == value`.
    fn count_matching(&self, column: &str, value: &Value) -> Result<u64>;
}

/// A context with no model behind it. `unique` always passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ValidationContext for NoContext {
    fn model_name(&self) -> &str {
        ""
    }

    fn persisted_value(&self, _property: &str) -> Option<Value> {
        None
    }

    fn count_matching(&self, _column: &str, _value: &Value) -> Result<u64> {
        Ok(0)
    }
}

/// Per-call context handed to every rule.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    /// Property being validated.
    pub property: &'a str,
    pub model: &'a dyn ValidationContext,
}

impl<'a> RuleContext<'a> {
    pub fn new(property: &'a str, model: &'a dyn ValidationContext) -> Self {
        Self { property, model }
    }
}

impl fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("property", &self.property)
            .field("model", &self.model.model_name())
            .finish()
    }
}

/// Options attached to a rule, e.g. `min=5` in `string:min=5`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions(BTreeMap<String, String>);

impl RuleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Comma separated list option.
    pub fn get_list(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Options as message template parameters.
    pub fn to_params(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

/// Signature of a validation rule.
///
/// Returns `Ok(true)` when the value passes. Errors are reserved for rules
/// that cannot run at all (e.g. a storage failure during a `unique` check).
pub type RuleFn = dyn Fn(&mut Value, &RuleOptions, &RuleContext<'_>) -> Result<bool> + Send + Sync;

/// One named rule in a chain.
#[derive(Clone)]
pub struct Rule {
    name: String,
    options: RuleOptions,
    func: Option<Arc<RuleFn>>,
}

impl Rule {
    /// A rule resolved by name at validation time (built-in or registered).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: RuleOptions::new(),
            func: None,
        }
    }

    /// A rule carrying its own implementation.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Value, &RuleOptions, &RuleContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            options: RuleOptions::new(),
            func: Some(Arc::new(func)),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &RuleOptions {
        &self.options
    }

    /// Parses one `name:key=value:flag` segment.
    fn parse(segment: &str) -> Option<Self> {
        let mut parts = segment.split(':');
        let name = parts.next()?.trim();
        if name.is_empty() {
            return None;
        }
        let mut rule = Rule::new(name);
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((key, value)) => rule.options.insert(key.trim(), value.trim()),
                None => rule.options.insert(part, ""),
            }
        }
        Some(rule)
    }

    fn is_resolvable(&self) -> bool {
        self.func.is_some() || rules::builtin(&self.name).is_some() || custom_rule(&self.name).is_some()
    }

    fn run(&self, value: &mut Value, ctx: &RuleContext<'_>) -> Result<bool> {
        if let Some(func) = &self.func {
            return func(value, &self.options, ctx);
        }
        if let Some(builtin) = rules::builtin(&self.name) {
            return builtin(value, &self.options, ctx);
        }
        match custom_rule(&self.name) {
            Some(func) => func(value, &self.options, ctx),
            None => Err(Error::Config(ConfigError::for_model(
                ctx.model.model_name(),
                format!("unknown validation rule `{}` on `{}`", self.name, ctx.property),
            ))),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("custom", &self.func.is_some())
            .finish()
    }
}

/// The first rule a value failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: String,
    pub options: RuleOptions,
}

/// An ordered list of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleChain {
    rules: Vec<Rule>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `"rule:opt=v:opt2=v|rule2"`. Empty segments are skipped.
    pub fn parse(spec: &str) -> Self {
        Self {
            rules: spec.split('|').filter_map(Rule::parse).collect(),
        }
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn with(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Names in the chain that neither carry an implementation nor resolve to
    /// a built-in or registered rule.
    pub fn unknown_rules(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| !r.is_resolvable())
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Runs the chain, returning the first failure.
    pub fn validate(&self, value: &mut Value, ctx: &RuleContext<'_>) -> Result<Option<RuleFailure>> {
        for rule in &self.rules {
            if !rule.run(value, ctx)? {
                tracing::trace!(
                    model = ctx.model.model_name(),
                    property = ctx.property,
                    rule = rule.name.as_str(),
                    "validation rule failed"
                );
                return Ok(Some(RuleFailure {
                    rule: rule.name.clone(),
                    options: rule.options.clone(),
                }));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// Custom rule registry
// ============================================================================

fn custom_rules() -> &'static RwLock<HashMap<String, Arc<RuleFn>>> {
    static RULES: OnceLock<RwLock<HashMap<String, Arc<RuleFn>>>> = OnceLock::new();
    RULES.get_or_init(|| RwLock::new(HashMap::new()))
}

fn custom_rule(name: &str) -> Option<Arc<RuleFn>> {
    custom_rules()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Registers a rule usable by name in any chain, and through `callable:fn=name`.
///
/// Built-in names cannot be overridden.
pub fn register_rule<F>(name: impl Into<String>, func: F) -> Result<()>
where
    F: Fn(&mut Value, &RuleOptions, &RuleContext<'_>) -> Result<bool> + Send + Sync + 'static,
{
    let name = name.into();
    if rules::builtin(&name).is_some() {
        return Err(Error::config(format!(
            "`{}` is a built-in validation rule and cannot be replaced",
            name
        )));
    }
    custom_rules()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name, Arc::new(func));
    Ok(())
}

/// Removes every registered custom rule.
pub fn clear_custom_rules() {
    custom_rules()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

pub(crate) fn registered_rule(name: &str) -> Option<Arc<RuleFn>> {
    custom_rule(name)
}

// ============================================================================
// Pattern matching
// ============================================================================

/// Thread-safe cache of compiled patterns, filled lazily on first use.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> std::result::Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Checks `value` against `pattern`, compiling it at most once per process.
///
/// An invalid pattern never matches and logs a warning.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Returns a message when `pattern` does not compile.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    match Regex::new(pattern) {
        Ok(_) => None,
        Err(e) => Some(format!("invalid regex pattern: {e}")),
    }
}

/// Validates a standalone value with no model context.
pub fn validate_value(chain: &RuleChain, property: &str, value: &mut Value) -> Result<Option<RuleFailure>> {
    chain.validate(value, &RuleContext::new(property, &NoContext))
}
