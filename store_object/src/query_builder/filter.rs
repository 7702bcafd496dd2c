//! Query builder utilities
//!
//! This module provides the predicate model shared by every backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::errors::StoreError;

/// Query condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOperator {
    Eq,        // =
    Ne,        // !=
    Gt,        // >
    Gte,       // >=
    Lt,        // <
    Lte,       // <=
    Like,      // LIKE
    ILike,     // ILIKE (case insensitive)
    In,        // IN
    NotIn,     // NOT IN
    IsNull,    // IS NULL
    IsNotNull, // IS NOT NULL
}

impl FromStr for QueryOperator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Ok(QueryOperator::Eq),
            "ne" | "neq" => Ok(QueryOperator::Ne),
            "gt" => Ok(QueryOperator::Gt),
            "gte" => Ok(QueryOperator::Gte),
            "lt" => Ok(QueryOperator::Lt),
            "lte" => Ok(QueryOperator::Lte),
            "like" => Ok(QueryOperator::Like),
            "ilike" => Ok(QueryOperator::ILike),
            "in" => Ok(QueryOperator::In),
            "not_in" => Ok(QueryOperator::NotIn),
            "is_null" => Ok(QueryOperator::IsNull),
            "is_not_null" => Ok(QueryOperator::IsNotNull),
            other => Err(StoreError::UnsupportedOperation(format!(
                "unknown filter operator '{}'",
                other
            ))),
        }
    }
}

/// Single condition in WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCondition {
    pub field: String,
    pub operator: QueryOperator,
    pub value: Option<Value>, // None for IS NULL/IS NOT NULL
}

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

/// Query filter that can be nested
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    Condition(QueryCondition),
    Group {
        operator: LogicalOperator,
        filters: Vec<QueryFilter>,
    },
}

impl QueryFilter {
    /// Create a simple condition
    pub fn condition(field: &str, operator: QueryOperator, value: Option<Value>) -> Self {
        Self::Condition(QueryCondition {
            field: field.to_string(),
            operator,
            value,
        })
    }

    /// Create AND group
    pub fn and(filters: Vec<QueryFilter>) -> Self {
        Self::Group {
            operator: LogicalOperator::And,
            filters,
        }
    }

    /// Create OR group
    pub fn or(filters: Vec<QueryFilter>) -> Self {
        Self::Group {
            operator: LogicalOperator::Or,
            filters,
        }
    }

    /// Equal condition
    pub fn eq(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Eq, Some(value))
    }

    /// Not equal condition
    pub fn ne(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Ne, Some(value))
    }

    /// Greater than condition
    pub fn gt(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Gt, Some(value))
    }

    /// Greater than or equal condition
    pub fn gte(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Gte, Some(value))
    }

    /// Less than condition
    pub fn lt(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Lt, Some(value))
    }

    /// Less than or equal condition
    pub fn lte(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Lte, Some(value))
    }

    /// LIKE condition
    pub fn like(field: &str, pattern: &str) -> Self {
        Self::condition(
            field,
            QueryOperator::Like,
            Some(Value::String(pattern.to_string())),
        )
    }

    /// ILIKE condition (case insensitive)
    pub fn ilike(field: &str, pattern: &str) -> Self {
        Self::condition(
            field,
            QueryOperator::ILike,
            Some(Value::String(pattern.to_string())),
        )
    }

    /// Case-insensitive substring match, with LIKE wildcards in `needle` escaped
    pub fn contains(field: &str, needle: &str) -> Self {
        Self::ilike(field, &format!("%{}%", escape_like(needle)))
    }

    /// IN condition
    pub fn in_values(field: &str, values: Vec<Value>) -> Self {
        Self::condition(field, QueryOperator::In, Some(Value::Array(values)))
    }

    /// NOT IN condition
    pub fn not_in_values(field: &str, values: Vec<Value>) -> Self {
        Self::condition(field, QueryOperator::NotIn, Some(Value::Array(values)))
    }

    /// IS NULL condition
    pub fn is_null(field: &str) -> Self {
        Self::condition(field, QueryOperator::IsNull, None)
    }

    /// IS NOT NULL condition
    pub fn is_not_null(field: &str) -> Self {
        Self::condition(field, QueryOperator::IsNotNull, None)
    }
}

/// Escape LIKE metacharacters so `text` matches literally
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
