//! Query builder utilities
//!
//! This module provides the predicate model, its SQL rendering and its
//! in-process evaluation.

pub mod builder;
pub mod evaluate;
pub mod filter;
pub mod ordering;
pub mod sql_generation;


pub use builder::QueryBuilder;
pub use evaluate::compare_values;
pub use filter::{escape_like, LogicalOperator, QueryCondition, QueryFilter, QueryOperator};
pub use ordering::SortOrder;
