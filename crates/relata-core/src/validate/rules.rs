//! Built-in validation rules.

use std::net::IpAddr;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use super::{RuleContext, RuleOptions, matches_pattern, registered_rule};
use crate::cast::{format_db_timestamp, parse_bool, parse_timestamp};
use crate::error::Result;
use crate::value::Value;

type BuiltinRule = fn(&mut Value, &RuleOptions, &RuleContext<'_>) -> Result<bool>;

/// Names of every built-in rule.
pub const BUILTIN_RULES: &[&str] = &[
    "required",
    "string",
    "matching",
    "range",
    "numeric",
    "integer",
    "boolean",
    "email",
    "url",
    "ip",
    "alpha",
    "alpha_numeric",
    "alpha_dash",
    "enum",
    "date",
    "timestamp",
    "db_timestamp",
    "password",
    "pattern",
    "unique",
    "callable",
];

const EMAIL_PATTERN: &str = r"^[a-z0-9._%+'-]+@[a-z0-9-]+(\.[a-z0-9-]+)*\.[a-z]{2,}$";
const URL_PATTERN: &str = r"^https?://[^\s/$.?#][^\s]*$";
const DEFAULT_PASSWORD_MIN: usize = 8;

pub(super) fn builtin(name: &str) -> Option<BuiltinRule> {
    let rule: BuiltinRule = match name {
        "required" => required,
        "string" => string,
        "matching" => matching,
        "range" => range,
        "numeric" => numeric,
        "integer" => integer,
        "boolean" => boolean,
        "email" => email,
        "url" => url,
        "ip" => ip,
        "alpha" => alpha,
        "alpha_numeric" => alpha_numeric,
        "alpha_dash" => alpha_dash,
        "enum" => one_of,
        "date" => date,
        "timestamp" => timestamp,
        "db_timestamp" => db_timestamp,
        "password" => password,
        "pattern" => pattern,
        "unique" => unique,
        "callable" => callable,
        _ => return None,
    };
    Some(rule)
}

fn required(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(!value.is_empty())
}

/// Text, optionally bounded by `min`/`max` character counts.
fn string(value: &mut Value, opts: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let Value::Text(s) = value else {
        return Ok(false);
    };
    let len = s.chars().count();
    Ok(opts.get_usize("min").is_none_or(|min| len >= min)
        && opts.get_usize("max").is_none_or(|max| len <= max))
}

/// An array whose elements are all equal (e.g. password + confirmation).
/// Collapses the value to the shared element.
fn matching(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let Value::Array(items) = value else {
        return Ok(true);
    };
    let Some(first) = items.first().cloned() else {
        return Ok(false);
    };
    if items.iter().any(|item| *item != first) {
        return Ok(false);
    }
    *value = first;
    Ok(true)
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        other => other.as_f64(),
    }
}

fn range(value: &mut Value, opts: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let Some(n) = numeric_value(value) else {
        return Ok(false);
    };
    Ok(opts.get_f64("min").is_none_or(|min| n >= min)
        && opts.get_f64("max").is_none_or(|max| n <= max))
}

fn numeric(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(numeric_value(value).is_some())
}

fn integer(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(match value {
        Value::Int(_) => true,
        Value::Float(f) => f.is_finite() && f.fract() == 0.0,
        Value::Text(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    })
}

/// Accepts booleans, 0/1 and the usual textual forms; normalizes to `Bool`.
fn boolean(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Int(0) => Some(false),
        Value::Int(1) => Some(true),
        Value::Text(s) => parse_bool(s),
        _ => None,
    };
    match parsed {
        Some(b) => {
            *value = Value::Bool(b);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Trims and lowercases before matching.
fn email(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let Value::Text(s) = value else {
        return Ok(false);
    };
    let normalized = s.trim().to_lowercase();
    let ok = matches_pattern(&normalized, EMAIL_PATTERN);
    *s = normalized;
    Ok(ok)
}

fn url(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(value.as_str().is_some_and(|s| matches_pattern(s, URL_PATTERN)))
}

fn ip(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(value.as_str().is_some_and(|s| s.parse::<IpAddr>().is_ok()))
}

fn all_chars(value: &Value, pred: impl Fn(char) -> bool) -> bool {
    value
        .as_str()
        .is_some_and(|s| !s.is_empty() && s.chars().all(pred))
}

fn alpha(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(all_chars(value, char::is_alphabetic))
}

fn alpha_numeric(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(all_chars(value, char::is_alphanumeric))
}

fn alpha_dash(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(all_chars(value, |c| c.is_alphanumeric() || c == '-' || c == '_'))
}

/// `enum:choices=a,b,c`
fn one_of(value: &mut Value, opts: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let Some(key) = value.index_key() else {
        return Ok(false);
    };
    Ok(opts.get_list("choices").contains(&key.as_str()))
}

fn date(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    Ok(match value {
        Value::Timestamp(_) | Value::Int(_) => true,
        Value::Text(s) => parse_timestamp(s).is_some(),
        _ => false,
    })
}

/// Converts date text to a Unix timestamp.
fn timestamp(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let ts = match value {
        Value::Timestamp(ts) | Value::Int(ts) => Some(*ts),
        Value::Text(s) => parse_timestamp(s),
        _ => None,
    };
    match ts {
        Some(ts) => {
            *value = Value::Timestamp(ts);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Converts a timestamp to the `Y-m-d H:M:S` storage text form.
fn db_timestamp(value: &mut Value, _: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let ts = match value {
        Value::Timestamp(ts) | Value::Int(ts) => Some(*ts),
        Value::Text(s) => parse_timestamp(s),
        _ => None,
    };
    match ts.and_then(format_db_timestamp) {
        Some(text) => {
            *value = Value::Text(text);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// `password:min=8` checks the length, then replaces the value with its
/// argon2 hash.
fn password(value: &mut Value, opts: &RuleOptions, ctx: &RuleContext<'_>) -> Result<bool> {
    let Value::Text(plain) = value else {
        return Ok(false);
    };
    let min = opts.get_usize("min").unwrap_or(DEFAULT_PASSWORD_MIN);
    if plain.chars().count() < min {
        return Ok(false);
    }
    let salt = SaltString::generate(&mut OsRng);
    match Argon2::default().hash_password(plain.as_bytes(), &salt) {
        Ok(hash) => {
            *value = Value::Text(hash.to_string());
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(
                model = ctx.model.model_name(),
                property = ctx.property,
                error = %e,
                "password hashing failed"
            );
            Ok(false)
        }
    }
}

/// Checks `plain` against a hash produced by the `password` rule.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// `pattern:regex=...`
fn pattern(value: &mut Value, opts: &RuleOptions, _: &RuleContext<'_>) -> Result<bool> {
    let Some(regex) = opts.get("regex") else {
        return Ok(false);
    };
    Ok(value.as_str().is_some_and(|s| matches_pattern(s, regex)))
}

/// No other stored row of the model's type may hold the value.
///
/// `unique:column=...` checks a differently named column. Skipped when the
/// value equals what is already persisted.
fn unique(value: &mut Value, opts: &RuleOptions, ctx: &RuleContext<'_>) -> Result<bool> {
    if let Some(current) = ctx.model.persisted_value(ctx.property) {
        if current.loosely_eq(value) {
            return Ok(true);
        }
    }
    let column = opts.get("column").unwrap_or(ctx.property);
    Ok(ctx.model.count_matching(column, value)? == 0)
}

/// `callable:fn=name` runs a rule registered with `register_rule`.
fn callable(value: &mut Value, opts: &RuleOptions, ctx: &RuleContext<'_>) -> Result<bool> {
    let Some(func) = opts.get("fn").and_then(registered_rule) else {
        tracing::warn!(
            model = ctx.model.model_name(),
            property = ctx.property,
            "callable rule names no registered function"
        );
        return Ok(false);
    };
    func(value, opts, ctx)
}
