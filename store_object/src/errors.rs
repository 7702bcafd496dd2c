use std::time::Duration;
use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid identifier: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Constraint violation on {table}: {message}")]
    Constraint { table: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Change channel closed: {0}")]
    ChannelClosed(String),
}
