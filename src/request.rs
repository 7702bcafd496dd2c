//! Declarative read and write descriptions
//!
//! A [`QuerySpec`] is immutable once built and is the single source of both
//! its cache key and its subscription signature. Filters live in a
//! `BTreeMap` so that the order in which they were added never changes
//! either identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use cache_system::{CacheError, hash_query};
use store_object::{
    QueryBuilder, QueryFilter, QueryOperator, ReadRequest, SortOrder, WriteOperation,
    WriteRequest,
};

use crate::errors::DataError;

/// Right-hand side of one filter entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    /// Equality
    Scalar(Value),
    /// Membership; an empty list matches nothing
    List(Vec<Value>),
    /// Explicit comparison
    Compare { operator: QueryOperator, value: Value },
}

impl FilterValue {
    pub fn compare(operator: QueryOperator, value: impl Into<Value>) -> Self {
        FilterValue::Compare {
            operator,
            value: value.into(),
        }
    }

    fn to_filter(&self, field: &str) -> QueryFilter {
        match self {
            FilterValue::Scalar(value) => QueryFilter::eq(field, value.clone()),
            FilterValue::List(values) => QueryFilter::in_values(field, values.clone()),
            FilterValue::Compare { operator, value } => match (operator, value) {
                (QueryOperator::In, Value::Array(values)) => {
                    QueryFilter::in_values(field, values.clone())
                }
                (QueryOperator::NotIn, Value::Array(values)) => {
                    QueryFilter::not_in_values(field, values.clone())
                }
                (QueryOperator::In, single) => QueryFilter::in_values(field, vec![single.clone()]),
                (QueryOperator::NotIn, single) => {
                    QueryFilter::not_in_values(field, vec![single.clone()])
                }
                (QueryOperator::IsNull, _) => QueryFilter::is_null(field),
                (QueryOperator::IsNotNull, _) => QueryFilter::is_not_null(field),
                (operator, value) => QueryFilter::condition(field, *operator, Some(value.clone())),
            },
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::Scalar(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Scalar(Value::String(value.to_string()))
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Scalar(Value::String(value))
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Scalar(Value::from(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Scalar(Value::Bool(value))
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(values: Vec<Value>) -> Self {
        FilterValue::List(values)
    }
}

/// One ordering term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

fn filters_to_query(filters: &BTreeMap<String, FilterValue>) -> QueryBuilder {
    filters
        .iter()
        .fold(QueryBuilder::new(), |query, (field, value)| {
            query.filter(value.to_filter(field))
        })
}

/// A read against one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub table: String,
    pub select: Option<String>,
    pub filters: BTreeMap<String, FilterValue>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<i64>,
    /// Caching policy; not part of the query identity
    #[serde(skip, default = "default_cached")]
    pub cached: bool,
    #[serde(skip)]
    pub cache_ttl: Option<Duration>,
}

fn default_cached() -> bool {
    true
}

/// The part of a query a subscription listens to
#[derive(Serialize)]
struct SignatureView<'a> {
    table: &'a str,
    filters: &'a BTreeMap<String, FilterValue>,
}

impl QuerySpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: None,
            filters: BTreeMap::new(),
            order_by: Vec::new(),
            limit: None,
            cached: true,
            cache_ttl: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    /// Add a filter; a later filter on the same field replaces the earlier one
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn filter_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(field, FilterValue::List(values))
    }

    pub fn filter_op(
        self,
        field: impl Into<String>,
        operator: QueryOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.filter(field, FilterValue::compare(operator, value))
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Predicate, ordering and limit as a store query
    pub fn to_query(&self) -> QueryBuilder {
        let query = self
            .order_by
            .iter()
            .fold(filters_to_query(&self.filters), |query, order| {
                query.order_by(&order.column, SortOrder::from_ascending(order.ascending))
            });

        match self.limit {
            Some(limit) => query.limit(limit),
            None => query,
        }
    }

    /// Only the filters, as used for change channels
    pub fn filter_query(&self) -> QueryBuilder {
        filters_to_query(&self.filters)
    }

    pub fn to_read_request(&self) -> ReadRequest {
        ReadRequest::new(self.table.clone())
            .with_select(self.select.clone())
            .with_query(self.to_query())
    }

    /// Identity used to share one upstream change channel between callers
    pub fn signature(&self) -> Result<String, CacheError> {
        let hash = hash_query(&SignatureView {
            table: &self.table,
            filters: &self.filters,
        })?;
        Ok(format!("{}:{}", self.table, hash))
    }
}

/// A write against one table
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSpec {
    pub table: String,
    pub operation: WriteOperation,
    pub data: Option<Value>,
    pub filters: BTreeMap<String, FilterValue>,
    pub returning: Option<String>,
    /// Natural key for upserts; the id column when empty
    pub conflict_columns: Vec<String>,
}

impl MutationSpec {
    pub fn new(table: impl Into<String>, operation: WriteOperation) -> Self {
        Self {
            table: table.into(),
            operation,
            data: None,
            filters: BTreeMap::new(),
            returning: None,
            conflict_columns: Vec::new(),
        }
    }

    /// Build from an operation name such as `"update"`
    pub fn from_operation_name(table: impl Into<String>, operation: &str) -> Result<Self, DataError> {
        let operation = operation
            .parse::<WriteOperation>()
            .map_err(|_| DataError::UnsupportedOperation(operation.to_string()))?;
        Ok(Self::new(table, operation))
    }

    pub fn insert(table: impl Into<String>, data: Value) -> Self {
        Self::new(table, WriteOperation::Insert).data(data)
    }

    pub fn update(table: impl Into<String>, data: Value) -> Self {
        Self::new(table, WriteOperation::Update).data(data)
    }

    pub fn upsert(table: impl Into<String>, data: Value) -> Self {
        Self::new(table, WriteOperation::Upsert).data(data)
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(table, WriteOperation::Delete)
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn returning(mut self, columns: impl Into<String>) -> Self {
        self.returning = Some(columns.into());
        self
    }

    pub fn conflict_columns(mut self, columns: Vec<String>) -> Self {
        self.conflict_columns = columns;
        self
    }

    /// Reject shapes that can only be programming errors
    pub fn check(&self) -> Result<(), DataError> {
        let needs_data = matches!(
            self.operation,
            WriteOperation::Insert | WriteOperation::Update | WriteOperation::Upsert
        );
        if needs_data && self.data.as_ref().is_none_or(Value::is_null) {
            return Err(DataError::UnsupportedOperation(format!(
                "{} on {} without data",
                self.operation, self.table
            )));
        }

        let needs_filters = matches!(
            self.operation,
            WriteOperation::Update | WriteOperation::Delete
        );
        if needs_filters && self.filters.is_empty() {
            return Err(DataError::UnsupportedOperation(format!(
                "{} on {} without filters",
                self.operation, self.table
            )));
        }
        Ok(())
    }

    pub fn to_write_request(&self) -> WriteRequest {
        let request = WriteRequest::new(self.table.clone(), self.operation)
            .with_query(filters_to_query(&self.filters))
            .with_returning(self.returning.clone())
            .with_conflict_columns(self.conflict_columns.clone());

        match &self.data {
            Some(data) => request.with_data(data.clone()),
            None => request,
        }
    }
}

/// One entry of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    Query(QuerySpec),
    Mutation(MutationSpec),
}

impl From<QuerySpec> for BatchItem {
    fn from(spec: QuerySpec) -> Self {
        BatchItem::Query(spec)
    }
}

impl From<MutationSpec> for BatchItem {
    fn from(spec: MutationSpec) -> Self {
        BatchItem::Mutation(spec)
    }
}
