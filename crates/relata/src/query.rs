//! Storage-agnostic query builder and its execution.
//!
//! A [`Query`] collects conditions, sort keys, paging, joins and an
//! eager-load list for one model type. Execution hands the prepared query
//! to the installed [`Driver`](crate::driver::Driver), turns the returned
//! rows into loaded models and resolves eager relations in batch.
//!
//! # Example
//!
//! ```ignore
//! let people = Person::query()
//!     .where_eq("team_id", 3)
//!     .where_op("age", Operator::Gte, 18)
//!     .sort("name asc, id desc")
//!     .with("team")
//!     .execute()?;
//! ```
//!
//! Types with soft delete are scoped to rows whose `deleted_at` is null
//! unless [`Query::with_deleted`] is set.

use std::sync::Arc;

use relata_core::{
    Condition, DELETED_AT, Direction, Join, Operator, Result, Row, Sort, Value,
};

use crate::entity::ModelType;
use crate::hydrator::Hydrator;
use crate::model::Model;
use crate::registry::{self, TypeEntry};

/// Limit applied when none is set.
pub const DEFAULT_LIMIT: usize = 100;

/// Hard maximum for a single page.
pub const MAX_LIMIT: usize = 1000;

/// A query over one model type.
#[derive(Debug, Clone)]
pub struct Query {
    model: ModelType,
    table: Option<String>,
    conditions: Vec<Condition>,
    sorts: Vec<Sort>,
    /// `None` only for the internal unpaged fetches of the hydrator.
    limit: Option<usize>,
    start: usize,
    joins: Vec<Join>,
    with: Vec<String>,
    with_deleted: bool,
}

impl Query {
    pub fn new(model: ModelType) -> Self {
        Self {
            model,
            table: None,
            conditions: Vec::new(),
            sorts: Vec::new(),
            limit: Some(DEFAULT_LIMIT),
            start: 0,
            joins: Vec::new(),
            with: Vec::new(),
            with_deleted: false,
        }
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    /// `column = value`; a `Null` value matches null columns.
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::equals(column, value));
        self
    }

    /// One equality condition per entry of `values`.
    pub fn where_all(mut self, values: Row) -> Self {
        self.conditions
            .extend(values.into_iter().map(|(column, value)| Condition::equals(column, value)));
        self
    }

    /// A raw storage fragment, passed to the driver as is.
    pub fn where_raw(mut self, fragment: impl Into<String>) -> Self {
        self.conditions.push(Condition::Raw(fragment.into()));
        self
    }

    pub fn where_op(
        mut self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition::compare(column, operator, value));
        self
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.where_op(column, Operator::In, Value::Array(values))
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.where_eq(column, Value::Null)
    }

    // ========================================================================
    // Sort, paging, joins
    // ========================================================================

    pub fn sort_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.sorts.push(Sort {
            column: column.into(),
            direction,
        });
        self
    }

    /// Appends sort keys parsed from `"name asc, id desc"`.
    pub fn sort(mut self, spec: &str) -> Self {
        self.sorts.extend(Sort::parse_list(spec));
        self
    }

    /// Page size, capped at [`MAX_LIMIT`].
    pub fn limit(mut self, limit: usize) -> Self {
        if limit > MAX_LIMIT {
            tracing::debug!(requested = limit, max = MAX_LIMIT, "query limit capped");
        }
        self.limit = Some(limit.min(MAX_LIMIT));
        self
    }

    /// Lifts the page limit so one driver call returns every match.
    pub(crate) fn unpaged(mut self) -> Self {
        self.limit = None;
        self
    }

    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    /// Inner join on rows of `table` whose `foreign_key` equals this type's
    /// `local_column`. Joined columns read as `table.column`.
    pub fn join(
        mut self,
        table: impl Into<String>,
        local_column: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.joins.push(Join::new(table, local_column, foreign_key));
        self
    }

    /// Eager-loads the named relation for every model of the result.
    pub fn with(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        if !self.with.contains(&relation) {
            self.with.push(relation);
        }
        self
    }

    /// Includes soft-deleted rows.
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    // ========================================================================
    // Accessors used by drivers
    // ========================================================================

    pub fn model_type(&self) -> &ModelType {
        &self.model
    }

    /// The table of the model type. Empty until the query is executed.
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or_default()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn sorts(&self) -> &[Sort] {
        &self.sorts
    }

    /// The page size, or `None` when every match is requested at once.
    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn get_start(&self) -> usize {
        self.start
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn eager(&self) -> &[String] {
        &self.with
    }

    pub fn includes_deleted(&self) -> bool {
        self.with_deleted
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Resolves the table and applies the soft-delete scope.
    fn prepare(&self) -> Result<(Arc<TypeEntry>, Query)> {
        let entry = registry::register(&self.model)?;
        let mut prepared = self.clone();
        prepared.table = Some(entry.definition().table().to_string());
        if entry.definition().has_soft_delete() && !self.with_deleted {
            prepared
                .conditions
                .push(Condition::equals(DELETED_AT, Value::Null));
        }
        Ok((entry, prepared))
    }

    /// Runs one page and returns loaded models with eager relations resolved.
    #[tracing::instrument(level = "debug", skip(self), fields(model = %self.model))]
    pub fn execute(&self) -> Result<Vec<Model>> {
        let (entry, prepared) = self.prepare()?;
        let rows = registry::driver()?.query(&prepared)?;
        tracing::debug!(
            table = prepared.table(),
            rows = rows.len(),
            eager = self.with.len(),
            "query executed"
        );

        let mut models = rows
            .iter()
            .map(|row| Model::hydrate(Arc::clone(&entry), row))
            .collect::<Result<Vec<_>>>()?;
        if !self.with.is_empty() {
            Hydrator::new(&entry).hydrate(&self.with, &mut models)?;
        }
        Ok(models)
    }

    /// The first match.
    pub fn first(&self) -> Result<Option<Model>> {
        Ok(self.clone().limit(1).execute()?.into_iter().next())
    }

    /// The first `limit` matches.
    pub fn first_n(&self, limit: usize) -> Result<Vec<Model>> {
        self.clone().limit(limit).execute()
    }

    /// Every match, fetched in pages of [`MAX_LIMIT`] from the query's start.
    pub fn all(&self) -> Result<Vec<Model>> {
        let mut models = Vec::new();
        let mut start = self.start;
        loop {
            let page = self.clone().limit(MAX_LIMIT).start(start).execute()?;
            let fetched = page.len();
            models.extend(page);
            if fetched < MAX_LIMIT {
                return Ok(models);
            }
            start += fetched;
        }
    }

    pub fn count(&self) -> Result<u64> {
        let (_, prepared) = self.prepare()?;
        registry::driver()?.count(&prepared)
    }

    pub fn sum(&self, field: &str) -> Result<f64> {
        let (_, prepared) = self.prepare()?;
        registry::driver()?.sum(&prepared, field)
    }

    pub fn average(&self, field: &str) -> Result<f64> {
        let (_, prepared) = self.prepare()?;
        registry::driver()?.average(&prepared, field)
    }

    pub fn min(&self, field: &str) -> Result<Value> {
        let (_, prepared) = self.prepare()?;
        registry::driver()?.min(&prepared, field)
    }

    pub fn max(&self, field: &str) -> Result<Value> {
        let (_, prepared) = self.prepare()?;
        registry::driver()?.max(&prepared, field)
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Updates every match with `values` through [`Model::set`] and returns
    /// how many models saved.
    pub fn set(&self, values: Row) -> Result<usize> {
        let mut saved = 0;
        for mut model in self.all()? {
            if model.set(values.clone())? {
                saved += 1;
            }
        }
        tracing::info!(model = %self.model, saved, "bulk update");
        Ok(saved)
    }

    /// Deletes every match through [`Model::delete`] and returns how many
    /// models were deleted.
    pub fn delete(&self) -> Result<usize> {
        let mut deleted = 0;
        for mut model in self.all()? {
            if model.delete()? {
                deleted += 1;
            }
        }
        tracing::info!(model = %self.model, deleted, "bulk delete");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Schema;
    use relata_core::row;

    fn ty() -> ModelType {
        ModelType::from_fn("QueryBuilderSample", Schema::new)
    }

    #[test]
    fn test_defaults() {
        let query = Query::new(ty());
        assert_eq!(query.get_limit(), Some(DEFAULT_LIMIT));
        assert_eq!(query.get_start(), 0);
        assert!(query.conditions().is_empty());
        assert!(!query.includes_deleted());
        assert_eq!(query.table(), "");
    }

    #[test]
    fn test_limit_is_capped() {
        assert_eq!(Query::new(ty()).limit(5000).get_limit(), Some(MAX_LIMIT));
        assert_eq!(Query::new(ty()).limit(7).get_limit(), Some(7));
        assert_eq!(Query::new(ty()).limit(7).unpaged().get_limit(), None);
    }

    #[test]
    fn test_condition_forms_accumulate() {
        let query = Query::new(ty())
            .where_all(row! { "a" => 1, "b" => "x" })
            .where_raw("c IS NOT NULL")
            .where_op("d", Operator::Gt, 3)
            .where_in("e", [1, 2])
            .where_null("f");
        assert_eq!(query.conditions().len(), 6);
        assert_eq!(query.conditions()[2], Condition::Raw("c IS NOT NULL".into()));
        assert_eq!(
            query.conditions()[4],
            Condition::compare("e", Operator::In, Value::Array(vec![1.into(), 2.into()]))
        );
        assert_eq!(query.conditions()[5], Condition::equals("f", Value::Null));
    }

    #[test]
    fn test_sort_and_eager_list() {
        let query = Query::new(ty())
            .sort("name desc, id")
            .sort_by("age", Direction::Desc)
            .with("team")
            .with("team")
            .with("groups");
        let columns: Vec<&str> = query.sorts().iter().map(|s| s.column.as_str()).collect();
        assert_eq!(columns, ["name", "id", "age"]);
        assert_eq!(query.sorts()[0].direction, Direction::Desc);
        assert_eq!(query.eager(), ["team", "groups"]);
    }

    #[test]
    fn test_join_is_recorded() {
        let query = Query::new(ty()).join("group_person", "id", "group_id");
        assert_eq!(query.joins(), [Join::new("group_person", "id", "group_id")]);
    }
}
