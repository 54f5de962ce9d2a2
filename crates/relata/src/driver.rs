//! The storage driver contract.
//!
//! A driver persists rows for the engine. It receives the [`Model`] being
//! written (for its table, identity and type name) or the [`Query`] being
//! executed (for its table, conditions, sort, paging and joins) and never
//! sees validation, events or caching. Every failure is reported as
//! [`Error::Driver`](relata_core::Error::Driver) carrying the operation and
//! model type.
//!
//! [`MemoryDriver`](crate::MemoryDriver) is the in-process reference
//! implementation.

use relata_core::{Result, Row, Value};

use crate::model::Model;
use crate::query::Query;

/// Storage backend.
///
/// `connection` names a connection for drivers that manage several; the
/// engine always passes `None` (the default connection).
pub trait Driver: Send + Sync {
    /// Inserts a row. `Ok(false)` means the storage refused without error.
    fn create(&self, model: &Model, values: &Row) -> Result<bool>;

    /// The identity generated for the last row created for `model`'s table.
    fn created_id(&self, model: &Model, property: &str) -> Result<Value>;

    /// Loads the row identified by `model`'s identity.
    fn load(&self, model: &Model) -> Result<Option<Row>>;

    /// Updates the row identified by `model`'s identity with `values`.
    fn update(&self, model: &Model, values: &Row) -> Result<bool>;

    /// Deletes the row identified by `model`'s identity.
    fn delete(&self, model: &Model) -> Result<bool>;

    /// Returns the raw rows matching `query`.
    fn query(&self, query: &Query) -> Result<Vec<Row>>;

    /// Counts rows matching `query`, ignoring its limit and start.
    fn count(&self, query: &Query) -> Result<u64>;

    fn sum(&self, query: &Query, field: &str) -> Result<f64>;

    fn average(&self, query: &Query, field: &str) -> Result<f64>;

    /// Smallest value of `field`, `Null` when nothing matches.
    fn min(&self, query: &Query, field: &str) -> Result<Value>;

    /// Largest value of `field`, `Null` when nothing matches.
    fn max(&self, query: &Query, field: &str) -> Result<Value>;

    fn begin_transaction(&self, connection: Option<&str>) -> Result<()>;

    fn commit(&self, connection: Option<&str>) -> Result<()>;

    fn rollback(&self, connection: Option<&str>) -> Result<()>;

    /// Whether a transaction opened outside the engine is active.
    fn in_transaction(&self, connection: Option<&str>) -> bool {
        let _ = connection;
        false
    }
}
