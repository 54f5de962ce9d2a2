//! In-process reference driver.
//!
//! [`MemoryDriver`] keeps tables as vectors of rows and evaluates queries
//! with the reference semantics of [`Condition::evaluate`]. It counts every
//! call and can be told to fail or refuse specific calls, which makes it the
//! driver used by the engine's own tests.
//!
//! Transactions snapshot the whole store on `begin_transaction` and restore
//! it on `rollback`. Only one transaction can be open at a time, which is all
//! the engine's depth counter ever asks for.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use relata_core::{
    Condition, DriverError, Error, Operation, Result, Row, Value, compare_values,
};

use crate::driver::Driver;
use crate::model::Model;
use crate::query::Query;

/// A driver entry point, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverCall {
    Create,
    CreatedId,
    Load,
    Update,
    Delete,
    Query,
    Count,
    Sum,
    Average,
    Min,
    Max,
    Begin,
    Commit,
    Rollback,
}

impl DriverCall {
    pub const fn operation(self) -> Operation {
        match self {
            DriverCall::Create | DriverCall::CreatedId => Operation::Create,
            DriverCall::Load => Operation::Load,
            DriverCall::Update => Operation::Update,
            DriverCall::Delete => Operation::Delete,
            DriverCall::Query => Operation::Query,
            DriverCall::Count
            | DriverCall::Sum
            | DriverCall::Average
            | DriverCall::Min
            | DriverCall::Max => Operation::Aggregate,
            DriverCall::Begin | DriverCall::Commit | DriverCall::Rollback => {
                Operation::Transaction
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Store {
    tables: BTreeMap<String, Vec<Row>>,
    /// Last generated id per table.
    sequences: HashMap<String, i64>,
    /// Identity of the last row created per table.
    last_ids: HashMap<String, Value>,
}

#[derive(Debug, Default)]
struct Controls {
    calls: HashMap<DriverCall, usize>,
    failing: HashSet<DriverCall>,
    refuse_writes: bool,
    external_transaction: bool,
}

/// Tables held in memory.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    store: Mutex<Store>,
    snapshot: Mutex<Option<Store>>,
    controls: Mutex<Controls>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Inspection and fault injection
    // ========================================================================

    /// How many times `call` was made.
    pub fn calls(&self, call: DriverCall) -> usize {
        lock(&self.controls).calls.get(&call).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.controls).calls.values().sum()
    }

    pub fn reset_calls(&self) {
        lock(&self.controls).calls.clear();
    }

    /// Makes every later `call` fail with a driver error.
    pub fn fail_on(&self, call: DriverCall) {
        lock(&self.controls).failing.insert(call);
    }

    pub fn clear_failures(&self) {
        lock(&self.controls).failing.clear();
    }

    /// Makes create, update and delete report `false` without touching rows.
    pub fn refuse_writes(&self, refuse: bool) {
        lock(&self.controls).refuse_writes = refuse;
    }

    /// Pretends a transaction was opened outside the engine.
    pub fn set_in_transaction(&self, open: bool) {
        lock(&self.controls).external_transaction = open;
    }

    /// A copy of the rows stored in `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.store).tables.get(table).cloned().unwrap_or_default()
    }

    /// Stores `row` directly, bypassing counters and sequences.
    pub fn insert_row(&self, table: &str, row: Row) {
        lock(&self.store)
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Counts `call` and fails it when requested.
    fn enter(&self, call: DriverCall, model: &str) -> Result<()> {
        let mut controls = lock(&self.controls);
        *controls.calls.entry(call).or_insert(0) += 1;
        if controls.failing.contains(&call) {
            tracing::debug!(?call, model, "injected driver failure");
            return Err(Error::Driver(DriverError::new(
                call.operation(),
                model,
                format!("injected failure on {:?}", call),
            )));
        }
        Ok(())
    }

    fn refusing(&self) -> bool {
        lock(&self.controls).refuse_writes
    }

    // ========================================================================
    // Query evaluation
    // ========================================================================

    /// Rows of the query's table with joins applied and conditions checked,
    /// before sorting and paging.
    fn matching(&self, query: &Query) -> Result<Vec<Row>> {
        let store = lock(&self.store);
        let mut rows = store.tables.get(query.table()).cloned().unwrap_or_default();

        for join in query.joins() {
            let joined = store.tables.get(&join.table).map(Vec::as_slice).unwrap_or_default();
            rows = rows
                .into_iter()
                .flat_map(|row| {
                    let local = row.get(&join.local_column).cloned().unwrap_or(Value::Null);
                    joined
                        .iter()
                        .filter(|other| {
                            !local.is_null()
                                && other
                                    .get(&join.foreign_key)
                                    .is_some_and(|value| value.loosely_eq(&local))
                        })
                        .map(|other| {
                            let mut combined = row.clone();
                            for (column, value) in other {
                                combined.insert(join.qualified(column), value.clone());
                            }
                            combined
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
        }

        let mut matched = Vec::new();
        for row in rows {
            if matches_all(query.conditions(), &row).map_err(|message| {
                Error::Driver(DriverError::new(
                    Operation::Query,
                    query.model_type().name(),
                    message,
                ))
            })? {
                matched.push(row);
            }
        }
        Ok(matched)
    }

    /// Non-null values of `field` over the matching rows.
    fn column(&self, query: &Query, field: &str) -> Result<Vec<Value>> {
        Ok(self
            .matching(query)?
            .into_iter()
            .filter_map(|mut row| row.remove(field))
            .filter(|value| !value.is_null())
            .collect())
    }

    fn position(rows: &[Row], identity: &Row) -> Option<usize> {
        if identity.is_empty() {
            return None;
        }
        rows.iter().position(|row| {
            identity.iter().all(|(column, value)| {
                row.get(column).is_some_and(|stored| stored.loosely_eq(value))
            })
        })
    }
}

fn matches_all(conditions: &[Condition], row: &Row) -> std::result::Result<bool, String> {
    for condition in conditions {
        if !condition.evaluate(row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Text(text) => text.trim().parse().ok(),
        other => other.as_f64(),
    }
}

impl Driver for MemoryDriver {
    fn create(&self, model: &Model, values: &Row) -> Result<bool> {
        self.enter(DriverCall::Create, model.model_type().name())?;
        if self.refusing() {
            return Ok(false);
        }

        let table = model.table();
        let ids = model.definition().id_properties();
        let mut row = values.clone();
        let mut store = lock(&self.store);

        if let [single] = ids {
            if row.get(single).is_none_or(Value::is_null) {
                let next = store.sequences.get(table).copied().unwrap_or(0) + 1;
                store.sequences.insert(table.to_string(), next);
                row.insert(single.clone(), Value::Int(next));
            } else if let Some(supplied) = row.get(single).and_then(Value::as_i64) {
                let current = store.sequences.entry(table.to_string()).or_insert(0);
                *current = (*current).max(supplied);
            }
        }

        let identity: Row = ids
            .iter()
            .map(|name| (name.clone(), row.get(name).cloned().unwrap_or(Value::Null)))
            .collect();
        let rows = store.tables.entry(table.to_string()).or_default();
        if Self::position(rows, &identity).is_some() {
            return Err(Error::Driver(DriverError::new(
                Operation::Create,
                model.model_type().name(),
                format!("duplicate identity in `{}`", table),
            )));
        }
        rows.push(row);

        let last = match ids {
            [single] => identity.get(single).cloned().unwrap_or(Value::Null),
            _ => Value::Object(identity),
        };
        store.last_ids.insert(table.to_string(), last);
        Ok(true)
    }

    fn created_id(&self, model: &Model, property: &str) -> Result<Value> {
        self.enter(DriverCall::CreatedId, model.model_type().name())?;
        let store = lock(&self.store);
        Ok(match store.last_ids.get(model.table()) {
            Some(Value::Object(identity)) => identity.get(property).cloned().unwrap_or(Value::Null),
            Some(value) => value.clone(),
            None => Value::Null,
        })
    }

    fn load(&self, model: &Model) -> Result<Option<Row>> {
        self.enter(DriverCall::Load, model.model_type().name())?;
        let store = lock(&self.store);
        let Some(rows) = store.tables.get(model.table()) else {
            return Ok(None);
        };
        Ok(Self::position(rows, &model.identity_values()).map(|index| rows[index].clone()))
    }

    fn update(&self, model: &Model, values: &Row) -> Result<bool> {
        self.enter(DriverCall::Update, model.model_type().name())?;
        if self.refusing() {
            return Ok(false);
        }
        let mut store = lock(&self.store);
        let Some(rows) = store.tables.get_mut(model.table()) else {
            return Ok(false);
        };
        let Some(index) = Self::position(rows, &model.identity_values()) else {
            return Ok(false);
        };
        for (column, value) in values {
            rows[index].insert(column.clone(), value.clone());
        }
        Ok(true)
    }

    fn delete(&self, model: &Model) -> Result<bool> {
        self.enter(DriverCall::Delete, model.model_type().name())?;
        if self.refusing() {
            return Ok(false);
        }
        let mut store = lock(&self.store);
        let Some(rows) = store.tables.get_mut(model.table()) else {
            return Ok(false);
        };
        match Self::position(rows, &model.identity_values()) {
            Some(index) => {
                rows.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn query(&self, query: &Query) -> Result<Vec<Row>> {
        self.enter(DriverCall::Query, query.model_type().name())?;
        let mut rows = self.matching(query)?;
        if !query.sorts().is_empty() {
            rows.sort_by(|a, b| {
                query
                    .sorts()
                    .iter()
                    .map(|sort| sort.compare(a, b))
                    .find(|ord| ord.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        Ok(rows
            .into_iter()
            .skip(query.get_start())
            .take(query.get_limit().unwrap_or(usize::MAX))
            .collect())
    }

    fn count(&self, query: &Query) -> Result<u64> {
        self.enter(DriverCall::Count, query.model_type().name())?;
        Ok(self.matching(query)?.len() as u64)
    }

    fn sum(&self, query: &Query, field: &str) -> Result<f64> {
        self.enter(DriverCall::Sum, query.model_type().name())?;
        Ok(self.column(query, field)?.iter().filter_map(numeric).sum())
    }

    fn average(&self, query: &Query, field: &str) -> Result<f64> {
        self.enter(DriverCall::Average, query.model_type().name())?;
        let values: Vec<f64> = self.column(query, field)?.iter().filter_map(numeric).collect();
        if values.is_empty() {
            return Ok(0.0);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    fn min(&self, query: &Query, field: &str) -> Result<Value> {
        self.enter(DriverCall::Min, query.model_type().name())?;
        Ok(self
            .column(query, field)?
            .into_iter()
            .min_by(compare_values)
            .unwrap_or(Value::Null))
    }

    fn max(&self, query: &Query, field: &str) -> Result<Value> {
        self.enter(DriverCall::Max, query.model_type().name())?;
        Ok(self
            .column(query, field)?
            .into_iter()
            .max_by(compare_values)
            .unwrap_or(Value::Null))
    }

    fn begin_transaction(&self, _connection: Option<&str>) -> Result<()> {
        self.enter(DriverCall::Begin, "")?;
        let mut snapshot = lock(&self.snapshot);
        if snapshot.is_some() {
            return Err(Error::Driver(DriverError::new(
                Operation::Transaction,
                "",
                "a transaction is already open",
            )));
        }
        *snapshot = Some(lock(&self.store).clone());
        Ok(())
    }

    fn commit(&self, _connection: Option<&str>) -> Result<()> {
        self.enter(DriverCall::Commit, "")?;
        match lock(&self.snapshot).take() {
            Some(_) => Ok(()),
            None => Err(Error::Driver(DriverError::new(
                Operation::Transaction,
                "",
                "commit without an open transaction",
            ))),
        }
    }

    fn rollback(&self, _connection: Option<&str>) -> Result<()> {
        self.enter(DriverCall::Rollback, "")?;
        match lock(&self.snapshot).take() {
            Some(saved) => {
                *lock(&self.store) = saved;
                Ok(())
            }
            None => Err(Error::Driver(DriverError::new(
                Operation::Transaction,
                "",
                "rollback without an open transaction",
            ))),
        }
    }

    fn in_transaction(&self, _connection: Option<&str>) -> bool {
        lock(&self.snapshot).is_some() || lock(&self.controls).external_transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relata_core::row;

    #[test]
    fn test_call_mapping() {
        assert_eq!(DriverCall::CreatedId.operation(), Operation::Create);
        assert_eq!(DriverCall::Average.operation(), Operation::Aggregate);
        assert_eq!(DriverCall::Rollback.operation(), Operation::Transaction);
    }

    #[test]
    fn test_transaction_restores_snapshot() {
        let driver = MemoryDriver::new();
        driver.insert_row("items", row! { "id" => 1 });

        driver.begin_transaction(None).unwrap();
        assert!(driver.in_transaction(None));
        driver.insert_row("items", row! { "id" => 2 });
        assert_eq!(driver.rows("items").len(), 2);
        driver.rollback(None).unwrap();

        assert!(!driver.in_transaction(None));
        assert_eq!(driver.rows("items"), vec![row! { "id" => 1 }]);
        assert_eq!(driver.calls(DriverCall::Begin), 1);
        assert_eq!(driver.calls(DriverCall::Rollback), 1);
    }

    #[test]
    fn test_nested_begin_is_an_error() {
        let driver = MemoryDriver::new();
        driver.begin_transaction(None).unwrap();
        assert!(driver.begin_transaction(None).is_err());
        driver.commit(None).unwrap();
        assert!(driver.commit(None).is_err());
    }

    #[test]
    fn test_injected_failure_is_counted() {
        let driver = MemoryDriver::new();
        driver.fail_on(DriverCall::Begin);
        let err = driver.begin_transaction(None).unwrap_err();
        assert!(matches!(
            err,
            Error::Driver(DriverError {
                operation: Operation::Transaction,
                ..
            })
        ));
        assert_eq!(driver.calls(DriverCall::Begin), 1);

        driver.clear_failures();
        driver.begin_transaction(None).unwrap();
        assert_eq!(driver.total_calls(), 2);
        driver.reset_calls();
        assert_eq!(driver.total_calls(), 0);
    }

    #[test]
    fn test_external_transaction_flag() {
        let driver = MemoryDriver::new();
        assert!(!driver.in_transaction(None));
        driver.set_in_transaction(true);
        assert!(driver.in_transaction(None));
    }
}
