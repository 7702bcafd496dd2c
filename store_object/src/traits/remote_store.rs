//! Remote relational store contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use signal_system::{ChangeEvent, Record};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::errors::StoreError;
use crate::query_builder::QueryBuilder;

/// A read against one table
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub table: String,
    /// Column list (`*` or comma separated); `None` selects every column
    pub select: Option<String>,
    pub query: QueryBuilder,
}

impl ReadRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: None,
            query: QueryBuilder::new(),
        }
    }

    pub fn with_select(mut self, select: Option<String>) -> Self {
        self.select = select;
        self
    }

    pub fn with_query(mut self, query: QueryBuilder) -> Self {
        self.query = query;
        self
    }
}

/// Kind of write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::Insert => "insert",
            WriteOperation::Update => "update",
            WriteOperation::Upsert => "upsert",
            WriteOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteOperation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(WriteOperation::Insert),
            "update" => Ok(WriteOperation::Update),
            "upsert" => Ok(WriteOperation::Upsert),
            "delete" => Ok(WriteOperation::Delete),
            other => Err(StoreError::UnsupportedOperation(format!(
                "unknown write operation '{}'",
                other
            ))),
        }
    }
}

/// A write against one table
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub table: String,
    pub operation: WriteOperation,
    /// One object, or an array of objects for multi-row inserts/upserts
    pub data: Option<Value>,
    /// Row selection for updates and deletes
    pub query: QueryBuilder,
    /// Column list of the returned rows; `None` returns every column
    pub returning: Option<String>,
    /// Natural key for upserts
    pub conflict_columns: Vec<String>,
}

impl WriteRequest {
    pub fn new(table: impl Into<String>, operation: WriteOperation) -> Self {
        Self {
            table: table.into(),
            operation,
            data: None,
            query: QueryBuilder::new(),
            returning: None,
            conflict_columns: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_query(mut self, query: QueryBuilder) -> Self {
        self.query = query;
        self
    }

    pub fn with_returning(mut self, returning: Option<String>) -> Self {
        self.returning = returning;
        self
    }

    pub fn with_conflict_columns(mut self, columns: Vec<String>) -> Self {
        self.conflict_columns = columns;
        self
    }

    /// The payload as a list of row objects
    pub fn rows(&self) -> Result<Vec<&Record>, StoreError> {
        match &self.data {
            Some(Value::Object(row)) => Ok(vec![row]),
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|row| match row {
                    Value::Object(row) => Ok(row),
                    _ => Err(StoreError::InvalidRequest(
                        "every row of a multi-row payload must be an object".to_string(),
                    )),
                })
                .collect(),
            Some(_) => Err(StoreError::InvalidRequest(
                "payload must be an object or an array of objects".to_string(),
            )),
            None => Err(StoreError::InvalidRequest(format!(
                "{} on {} requires a payload",
                self.operation, self.table
            ))),
        }
    }
}

/// Closes the upstream side of a change channel, at the latest when dropped
pub struct ChannelCloser(Option<Box<dyn FnOnce() + Send>>);

impl ChannelCloser {
    pub fn new(close: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(close)))
    }

    pub fn close(mut self) {
        if let Some(close) = self.0.take() {
            close();
        }
    }
}

impl Drop for ChannelCloser {
    fn drop(&mut self) {
        if let Some(close) = self.0.take() {
            close();
        }
    }
}

/// Stream of row changes on one table
pub struct ChangeChannel {
    events: mpsc::Receiver<ChangeEvent>,
    closer: ChannelCloser,
}

impl fmt::Debug for ChangeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeChannel")
            .field("closed", &self.events.is_closed())
            .finish()
    }
}

impl ChangeChannel {
    pub fn new(events: mpsc::Receiver<ChangeEvent>, closer: ChannelCloser) -> Self {
        Self { events, closer }
    }

    /// Next change, `None` once the upstream is gone
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Receiver<ChangeEvent>, ChannelCloser) {
        (self.events, self.closer)
    }

    pub fn close(self) {
        self.closer.close();
    }
}

/// Remote relational store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch rows matching the request
    async fn read(&self, request: &ReadRequest) -> Result<Vec<Record>, StoreError>;

    /// Apply a write and return the affected rows
    async fn write(&self, request: &WriteRequest) -> Result<Vec<Record>, StoreError>;

    /// Open a stream of changes on `table`, optionally restricted by `filter`
    async fn open_change_channel(
        &self,
        table: &str,
        filter: Option<&QueryBuilder>,
        buffer: usize,
    ) -> Result<ChangeChannel, StoreError>;
}
