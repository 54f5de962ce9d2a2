//! Storage-agnostic query clauses.
//!
//! Queries describe filters, ordering and joins with these descriptors; each
//! driver translates them to its storage. [`Condition::evaluate`] and
//! [`compare_values`] give the reference in-memory semantics, used by the
//! in-process driver and by any driver filtering rows itself.

use std::cmp::Ordering;
use std::fmt;

use crate::validate::matches_pattern;
use crate::value::{Row, Value};

/// Comparison operator of a [`Condition::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Value is an array of accepted values.
    In,
    NotIn,
    /// SQL-style pattern with `%` and `_` wildcards.
    Like,
}

impl Operator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
        }
    }

    pub fn parse(op: &str) -> Option<Self> {
        match op.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Some(Operator::Eq),
            "<>" | "!=" => Some(Operator::NotEq),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Lte),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Gte),
            "IN" => Some(Operator::In),
            "NOT IN" => Some(Operator::NotIn),
            "LIKE" => Some(Operator::Like),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One where condition. All conditions of a query are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`; a `Null` value means `column IS NULL`.
    Equals { column: String, value: Value },
    /// A raw storage fragment passed through to the driver.
    Raw(String),
    /// `column <op> value`.
    Compare {
        column: String,
        operator: Operator,
        value: Value,
    },
}

impl Condition {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn compare(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    /// The column a structured condition filters on.
    pub fn column(&self) -> Option<&str> {
        match self {
            Condition::Equals { column, .. } | Condition::Compare { column, .. } => Some(column),
            Condition::Raw(_) => None,
        }
    }

    /// Evaluates the condition against an in-memory row.
    ///
    /// Raw fragments are only understood in the forms `column IS NULL` and
    /// `column IS NOT NULL`; anything else is returned as an error message.
    pub fn evaluate(&self, row: &Row) -> Result<bool, String> {
        match self {
            Condition::Equals { column, value } => {
                let actual = row.get(column).unwrap_or(&Value::Null);
                Ok(if value.is_null() {
                    actual.is_null()
                } else {
                    actual.loosely_eq(value)
                })
            }
            Condition::Compare {
                column,
                operator,
                value,
            } => {
                let actual = row.get(column).unwrap_or(&Value::Null);
                Ok(apply_operator(actual, *operator, value))
            }
            Condition::Raw(fragment) => evaluate_raw(fragment, row),
        }
    }
}

fn apply_operator(actual: &Value, operator: Operator, expected: &Value) -> bool {
    match operator {
        Operator::Eq => !actual.is_null() && actual.loosely_eq(expected),
        Operator::NotEq => !actual.is_null() && !actual.loosely_eq(expected),
        Operator::In | Operator::NotIn => {
            let found = expected
                .as_array()
                .is_some_and(|items| items.iter().any(|v| actual.loosely_eq(v)));
            !actual.is_null() && (found == (operator == Operator::In))
        }
        Operator::Like => match (actual.index_key(), expected.as_str()) {
            (Some(text), Some(pattern)) => matches_pattern(&text, &like_to_regex(pattern)),
            _ => false,
        },
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            if actual.is_null() || expected.is_null() {
                return false;
            }
            let ord = compare_values(actual, expected);
            match operator {
                Operator::Lt => ord == Ordering::Less,
                Operator::Lte => ord != Ordering::Greater,
                Operator::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }
        }
    }
}

fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex
}

fn evaluate_raw(fragment: &str, row: &Row) -> Result<bool, String> {
    let trimmed = fragment.trim();
    let upper = trimmed.to_ascii_uppercase();
    if let Some(column) = upper
        .strip_suffix(" IS NOT NULL")
        .map(|_| trimmed[..trimmed.len() - " IS NOT NULL".len()].trim())
    {
        return Ok(!row.get(column).unwrap_or(&Value::Null).is_null());
    }
    if let Some(column) = upper
        .strip_suffix(" IS NULL")
        .map(|_| trimmed[..trimmed.len() - " IS NULL".len()].trim())
    {
        return Ok(row.get(column).unwrap_or(&Value::Null).is_null());
    }
    Err(format!("unsupported raw condition `{}`", fragment))
}

/// Total order used for sorting and range comparisons.
///
/// `Null` sorts first; numbers compare numerically (text that parses as a
/// number counts as one); everything else compares by its canonical key.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    a.index_key().cmp(&b.index_key())
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(_) => None,
        other => other.as_f64(),
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub column: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    /// Parses `"name asc, id desc"`. Unknown directions default to ascending.
    pub fn parse_list(spec: &str) -> Vec<Self> {
        spec.split(',')
            .filter_map(|part| {
                let mut words = part.split_whitespace();
                let column = words.next()?;
                let direction = match words.next().map(str::to_ascii_lowercase).as_deref() {
                    Some("desc") => Direction::Desc,
                    _ => Direction::Asc,
                };
                Some(Self {
                    column: column.to_string(),
                    direction,
                })
            })
            .collect()
    }

    /// Compares two rows by this key.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = compare_values(
            a.get(&self.column).unwrap_or(&Value::Null),
            b.get(&self.column).unwrap_or(&Value::Null),
        );
        match self.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

/// An inner join: rows of `table` whose `foreign_key` equals the local row's
/// `local_column`. Joined columns are exposed as `table.column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    pub local_column: String,
    pub foreign_key: String,
}

impl Join {
    pub fn new(
        table: impl Into<String>,
        local_column: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_column: local_column.into(),
            foreign_key: foreign_key.into(),
        }
    }

    /// `table.column` as exposed in joined result rows.
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_equals_is_loose_and_null_aware() {
        let r = row! { "id" => 5, "name" => "Ada", "team_id" => Value::Null };
        assert_eq!(Condition::equals("id", "5").evaluate(&r), Ok(true));
        assert_eq!(Condition::equals("team_id", Value::Null).evaluate(&r), Ok(true));
        assert_eq!(Condition::equals("missing", Value::Null).evaluate(&r), Ok(true));
        assert_eq!(Condition::equals("name", "Bob").evaluate(&r), Ok(false));
    }

    #[test]
    fn test_compare_operators() {
        let r = row! { "age" => 30, "name" => "Ada Lovelace" };
        let eval = |op, v: Value| Condition::compare("age", op, v).evaluate(&r).unwrap();
        assert!(eval(Operator::Gt, Value::Int(18)));
        assert!(eval(Operator::Lte, Value::Int(30)));
        assert!(!eval(Operator::Lt, Value::Int(30)));
        assert!(eval(Operator::In, Value::from(vec![10, 30])));
        assert!(eval(Operator::NotIn, Value::from(vec![10, 20])));
        assert!(eval(Operator::NotEq, Value::Int(31)));
        assert!(
            Condition::compare("name", Operator::Like, "Ada%")
                .evaluate(&r)
                .unwrap()
        );
        assert!(
            !Condition::compare("name", Operator::Like, "%Byron")
                .evaluate(&r)
                .unwrap()
        );
    }

    #[test]
    fn test_null_never_satisfies_comparisons() {
        let r = row! { "age" => Value::Null };
        assert_eq!(Condition::compare("age", Operator::Lt, 5).evaluate(&r), Ok(false));
        assert_eq!(
            Condition::compare("age", Operator::NotIn, vec![1]).evaluate(&r),
            Ok(false)
        );
    }

    #[test]
    fn test_raw_null_checks() {
        let r = row! { "deleted_at" => Value::Null, "name" => "x" };
        assert_eq!(Condition::Raw("deleted_at IS NULL".into()).evaluate(&r), Ok(true));
        assert_eq!(Condition::Raw("name is not null".into()).evaluate(&r), Ok(true));
        assert!(Condition::Raw("name = 'x'".into()).evaluate(&r).is_err());
    }

    #[test]
    fn test_sort_parsing_and_ordering() {
        let sorts = Sort::parse_list("name asc, id DESC,created_at");
        assert_eq!(
            sorts,
            vec![Sort::asc("name"), Sort::desc("id"), Sort::asc("created_at")]
        );

        let a = row! { "n" => 2 };
        let b = row! { "n" => "10" };
        assert_eq!(Sort::asc("n").compare(&a, &b), Ordering::Less);
        assert_eq!(Sort::desc("n").compare(&a, &b), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &Value::Int(0)), Ordering::Less);
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("!="), Some(Operator::NotEq));
        assert_eq!(Operator::parse("not in"), Some(Operator::NotIn));
        assert_eq!(Operator::parse("~"), None);
        assert_eq!(Join::new("group_person", "id", "group_id").qualified("person_id"), "group_person.person_id");
    }
}
