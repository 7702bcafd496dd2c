//! In-process remote store
//!
//! Keeps tables as vectors of JSON rows and applies the same predicate,
//! ordering, projection and change-notification semantics as the
//! PostgreSQL backend. Used for local development and tests.

use async_trait::async_trait;
use serde_json::Value;
use signal_system::{ChangeEvent, EventType, Record};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, RwLock};

use crate::errors::StoreError;
use crate::query_builder::{compare_values, QueryBuilder, SortOrder};
use crate::traits::{
    ChangeChannel, ChannelCloser, ReadRequest, RemoteStore, WriteOperation, WriteRequest,
};
use crate::validation::{parse_column_list, ValidatedFieldName, ValidatedTableName};

struct ChannelSink {
    id: u64,
    table: String,
    filter: Option<QueryBuilder>,
    sender: mpsc::Sender<ChangeEvent>,
}

type Sinks = Arc<Mutex<Vec<ChannelSink>>>;

fn lock_sinks(sinks: &Mutex<Vec<ChannelSink>>) -> MutexGuard<'_, Vec<ChannelSink>> {
    sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory implementation of [`RemoteStore`]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    sinks: Sinks,
    next_channel_id: AtomicU64,
    id_column: String,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("id_column", &self.id_column)
            .field("open_channels", &self.open_channels())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_id_column("id")
    }

    /// Use `id_column` as the unique row identifier
    pub fn with_id_column(id_column: &str) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            sinks: Arc::new(Mutex::new(Vec::new())),
            next_channel_id: AtomicU64::new(1),
            id_column: id_column.to_string(),
        }
    }

    /// Replace the contents of `table`
    pub async fn seed(&self, table: &str, rows: Vec<Record>) {
        self.tables.write().await.insert(table.to_string(), rows);
    }

    /// Snapshot of every row in `table`
    pub async fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of change channels currently open
    pub fn open_channels(&self) -> usize {
        lock_sinks(&self.sinks)
            .iter()
            .filter(|sink| !sink.sender.is_closed())
            .count()
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }

        let mut sinks = lock_sinks(&self.sinks);
        sinks.retain(|sink| !sink.sender.is_closed());

        for event in &events {
            for sink in sinks.iter().filter(|sink| sink.table == event.table_name) {
                let selected = match (&sink.filter, event.record()) {
                    (Some(filter), Some(record)) => filter.matches(record),
                    _ => true,
                };
                if selected && sink.sender.try_send(event.clone()).is_err() {
                    tracing::warn!(
                        table = %event.table_name,
                        channel = sink.id,
                        "change channel full or closed, event dropped"
                    );
                }
            }
        }
    }

    fn project(row: &Record, columns: &Option<Vec<ValidatedFieldName>>) -> Record {
        match columns {
            None => row.clone(),
            Some(columns) => columns
                .iter()
                .filter_map(|column| {
                    row.get(column.as_str())
                        .map(|value| (column.as_str().to_string(), value.clone()))
                })
                .collect(),
        }
    }

    fn ensure_unique(&self, table: &str, rows: &[Record], row: &Record) -> Result<(), StoreError> {
        let Some(id) = row.get(&self.id_column).filter(|id| !id.is_null()) else {
            return Ok(());
        };
        if rows.iter().any(|existing| existing.get(&self.id_column) == Some(id)) {
            return Err(StoreError::Constraint {
                table: table.to_string(),
                message: format!("duplicate key value {} for {}", id, self.id_column),
            });
        }
        Ok(())
    }

    fn with_generated_id(&self, row: &Record) -> Record {
        let mut row = row.clone();
        if row.get(&self.id_column).is_none_or(Value::is_null) {
            row.insert(
                self.id_column.clone(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        row
    }
}

fn sort_rows(rows: &mut [Record], ordering: &[(String, SortOrder)]) {
    if ordering.is_empty() {
        return;
    }

    rows.sort_by(|a, b| {
        for (field, order) in ordering {
            let left = a.get(field).unwrap_or(&Value::Null);
            let right = b.get(field).unwrap_or(&Value::Null);
            // NULLs sort last ascending, first descending, as in PostgreSQL
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn validate_query(query: &QueryBuilder) -> Result<(), StoreError> {
    // Same identifier rules as the SQL backend
    query.build_where_clause()?;
    query.build_order_clause()?;
    Ok(())
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read(&self, request: &ReadRequest) -> Result<Vec<Record>, StoreError> {
        ValidatedTableName::new(&request.table)?;
        validate_query(&request.query)?;
        let columns = parse_column_list(request.select.as_deref())?;

        let tables = self.tables.read().await;
        let mut rows: Vec<Record> = tables
            .get(&request.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| request.query.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(tables);

        sort_rows(&mut rows, request.query.ordering());

        let offset = request.query.offset_value().unwrap_or(0).max(0) as usize;
        let limit = request
            .query
            .limit_value()
            .map(|limit| limit.max(0) as usize)
            .unwrap_or(usize::MAX);

        Ok(rows
            .iter()
            .skip(offset)
            .take(limit)
            .map(|row| Self::project(row, &columns))
            .collect())
    }

    async fn write(&self, request: &WriteRequest) -> Result<Vec<Record>, StoreError> {
        ValidatedTableName::new(&request.table)?;
        validate_query(&request.query)?;
        let returning = parse_column_list(request.returning.as_deref())?;

        let mut tables = self.tables.write().await;
        let rows = tables.entry(request.table.clone()).or_default();
        let mut affected = Vec::new();
        let mut events = Vec::new();

        match request.operation {
            WriteOperation::Insert => {
                let incoming: Vec<Record> = request
                    .rows()?
                    .into_iter()
                    .map(|row| self.with_generated_id(row))
                    .collect();

                // Validate the whole batch before touching the table
                for (index, row) in incoming.iter().enumerate() {
                    self.ensure_unique(&request.table, rows, row)?;
                    self.ensure_unique(&request.table, &incoming[..index], row)?;
                }

                for row in incoming {
                    events.push(ChangeEvent::new(EventType::Insert, &request.table).with_new(row.clone()));
                    affected.push(row.clone());
                    rows.push(row);
                }
            }
            WriteOperation::Update => {
                let changes = request.rows()?;
                let [changes] = changes.as_slice() else {
                    return Err(StoreError::InvalidRequest(
                        "update payload must be a single object".to_string(),
                    ));
                };

                for row in rows.iter_mut().filter(|row| request.query.matches(row)) {
                    let old = row.clone();
                    for (column, value) in changes.iter() {
                        row.insert(column.clone(), value.clone());
                    }
                    events.push(
                        ChangeEvent::new(EventType::Update, &request.table)
                            .with_old(old)
                            .with_new(row.clone()),
                    );
                    affected.push(row.clone());
                }
            }
            WriteOperation::Upsert => {
                let conflict_columns = if request.conflict_columns.is_empty() {
                    vec![self.id_column.clone()]
                } else {
                    request.conflict_columns.clone()
                };

                // Applied to a copy so a conflict on a later row leaves the table untouched
                let mut staged = rows.clone();
                for incoming in request.rows()? {
                    let existing = staged.iter_mut().find(|row| {
                        conflict_columns.iter().all(|column| {
                            incoming
                                .get(column)
                                .is_some_and(|value| !value.is_null() && row.get(column) == Some(value))
                        })
                    });

                    match existing {
                        Some(row) => {
                            let old = row.clone();
                            for (column, value) in incoming.iter() {
                                row.insert(column.clone(), value.clone());
                            }
                            events.push(
                                ChangeEvent::new(EventType::Update, &request.table)
                                    .with_old(old)
                                    .with_new(row.clone()),
                            );
                            affected.push(row.clone());
                        }
                        None => {
                            let row = self.with_generated_id(incoming);
                            self.ensure_unique(&request.table, &staged, &row)?;
                            events.push(
                                ChangeEvent::new(EventType::Insert, &request.table)
                                    .with_new(row.clone()),
                            );
                            affected.push(row.clone());
                            staged.push(row);
                        }
                    }
                }
                *rows = staged;
            }
            WriteOperation::Delete => {
                let (removed, kept): (Vec<Record>, Vec<Record>) = rows
                    .drain(..)
                    .partition(|row| request.query.matches(row));
                *rows = kept;

                for row in removed {
                    events.push(ChangeEvent::new(EventType::Delete, &request.table).with_old(row.clone()));
                    affected.push(row);
                }
            }
        }
        drop(tables);

        self.publish(events);

        Ok(affected
            .iter()
            .map(|row| Self::project(row, &returning))
            .collect())
    }

    async fn open_change_channel(
        &self,
        table: &str,
        filter: Option<&QueryBuilder>,
        buffer: usize,
    ) -> Result<ChangeChannel, StoreError> {
        ValidatedTableName::new(table)?;
        if let Some(filter) = filter {
            validate_query(filter)?;
        }

        let (sender, events) = mpsc::channel(buffer.max(1));
        let id = self.next_channel_id.fetch_add(1, AtomicOrdering::Relaxed);

        lock_sinks(&self.sinks).push(ChannelSink {
            id,
            table: table.to_string(),
            filter: filter.cloned(),
            sender,
        });

        let sinks = Arc::downgrade(&self.sinks);
        let closer = ChannelCloser::new(move || {
            if let Some(sinks) = sinks.upgrade() {
                lock_sinks(&sinks).retain(|sink| sink.id != id);
            }
        });

        Ok(ChangeChannel::new(events, closer))
    }
}
