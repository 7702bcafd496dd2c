//! Convenience re-exports for common store-object usage

// Store contract
pub use crate::traits::{ChangeChannel, ReadRequest, RemoteStore, WriteOperation, WriteRequest};

// Backends
pub use crate::memory::MemoryStore;
pub use crate::postgres::PgRemoteStore;

// Error types
pub use crate::errors::StoreError;

// Validation
pub use crate::validation::{ValidatedFieldName, ValidatedTableName, ValidationError};

// Query building
pub use crate::query_builder::{QueryBuilder, QueryFilter, QueryOperator, SortOrder};

pub use signal_system::{ChangeEvent, EventType, Record};

// Common external dependencies that are frequently used
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use sqlx::PgPool;
