//! PostgreSQL remote store
//!
//! Rows travel as JSON: reads and writes wrap the statement so PostgreSQL
//! returns `to_jsonb` of each row, which keeps the store schema-agnostic.
//! Change channels are backed by LISTEN/NOTIFY on `<table>_changes`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use signal_system::{ChangeEvent, EventType, Record};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgArguments, PgListener, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Postgres;
use std::time::Duration;
use tokio::sync::mpsc;

use config::DatabaseConfig;

use crate::errors::StoreError;
use crate::query_builder::sql_generation::SqlGenerator;
use crate::query_builder::QueryBuilder;
use crate::traits::{
    ChangeChannel, ChannelCloser, ReadRequest, RemoteStore, WriteOperation, WriteRequest,
};
use crate::validation::{parse_column_list, ValidatedFieldName, ValidatedTableName};

const ROW_ALIAS: &str = "unidata_row";
const CHANGED_ALIAS: &str = "unidata_changed";
const NOTIFY_FUNCTION: &str = "unidata_notify_change";
const LISTENER_RETRY: Duration = Duration::from_secs(1);

type JsonQuery<'q> = sqlx::query::QueryScalar<'q, Postgres, Json<Value>, PgArguments>;

// Shared parameter binding: timestamps and UUIDs get their native types,
// arrays and objects go over the wire as jsonb
macro_rules! bind_json_param {
    ($query:expr, $param:expr) => {
        match $param {
            Value::String(s) => {
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&s) {
                    $query.bind(dt.with_timezone(&chrono::Utc))
                } else if let Ok(uuid) = uuid::Uuid::parse_str(&s) {
                    $query.bind(uuid)
                } else {
                    $query.bind(s)
                }
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        $query.bind(i as i32)
                    } else {
                        $query.bind(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    $query.bind(f)
                } else {
                    $query.bind(n.to_string())
                }
            }
            Value::Bool(b) => $query.bind(b),
            Value::Null => $query.bind(Option::<String>::None),
            other => $query.bind(Json(other)),
        }
    };
}

fn bind_params(mut query: JsonQuery<'_>, params: Vec<Value>) -> JsonQuery<'_> {
    for param in params {
        query = bind_json_param!(query, param);
    }
    query
}

fn map_database_error(table: &str, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        if matches!(
            db_error.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ) {
            return StoreError::Constraint {
                table: table.to_string(),
                message: db_error.message().to_string(),
            };
        }
    }
    StoreError::Database(error)
}

fn into_records(rows: Vec<Json<Value>>) -> Result<Vec<Record>, StoreError> {
    rows.into_iter()
        .map(|Json(value)| match value {
            Value::Object(record) => Ok(record),
            other => Err(StoreError::InvalidRequest(format!(
                "expected a row object, got {}",
                other
            ))),
        })
        .collect()
}

/// Row projection as a jsonb expression over `alias`
fn row_projection(columns: Option<&[ValidatedFieldName]>, alias: &str) -> String {
    match columns {
        Some(columns) if !columns.is_empty() => {
            let pairs = columns
                .iter()
                .map(|column| format!("'{}', {}.{}", column.as_str(), alias, column.quoted()))
                .collect::<Vec<_>>()
                .join(", ");
            format!("jsonb_build_object({})", pairs)
        }
        _ => format!("to_jsonb({})", alias),
    }
}

/// Payload sent by the notify trigger
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    event_type: EventType,
    #[serde(default)]
    new: Option<Record>,
    #[serde(default)]
    old: Option<Record>,
}

/// [`RemoteStore`] over a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgRemoteStore {
    pool: PgPool,
    id_column: String,
}

impl PgRemoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            id_column: "id".to_string(),
        }
    }

    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut pool_options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        if config.max_lifetime_seconds > 0 {
            pool_options =
                pool_options.max_lifetime(Duration::from_secs(config.max_lifetime_seconds));
        }

        let pool = pool_options.connect(&config.connection_string()).await?;
        tracing::info!(host = %config.host, database = %config.database, "connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Column used as the default conflict target for upserts
    pub fn with_id_column(mut self, id_column: &str) -> Self {
        self.id_column = id_column.to_string();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create the notify function and a row trigger on `table` so that
    /// change channels receive its inserts, updates and deletes
    pub async fn install_change_trigger(&self, table: &str) -> Result<(), StoreError> {
        let table = ValidatedTableName::new(table)?;

        let function_sql = format!(
            r#"
            CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$
            BEGIN
                PERFORM pg_notify(
                    TG_TABLE_NAME || '_changes',
                    json_build_object(
                        'event_type', TG_OP,
                        'new', CASE WHEN TG_OP = 'DELETE' THEN NULL ELSE row_to_json(NEW) END,
                        'old', CASE WHEN TG_OP = 'INSERT' THEN NULL ELSE row_to_json(OLD) END
                    )::text
                );
                RETURN COALESCE(NEW, OLD);
            END;
            $$ LANGUAGE plpgsql
            "#,
            function = NOTIFY_FUNCTION
        );
        sqlx::query(&function_sql).execute(&self.pool).await?;

        let trigger_name = format!("{}_unidata_changes", table.as_str());
        let trigger_sql = format!(
            r#"
            DO $$
            BEGIN
                IF NOT EXISTS (
                    SELECT 1 FROM pg_trigger
                    WHERE tgname = '{trigger}' AND tgrelid = '{table}'::regclass
                ) THEN
                    CREATE TRIGGER "{trigger}"
                    AFTER INSERT OR UPDATE OR DELETE ON {table}
                    FOR EACH ROW EXECUTE FUNCTION {function}();
                END IF;
            END $$
            "#,
            trigger = trigger_name,
            table = table.quoted(),
            function = NOTIFY_FUNCTION
        );
        sqlx::query(&trigger_sql).execute(&self.pool).await?;

        tracing::info!(table = %table, "change trigger installed");
        Ok(())
    }

    async fn fetch_json(
        &self,
        table: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>, StoreError> {
        crate::trace_log!(sql = %sql, params = params.len(), "executing statement");
        let rows = bind_params(sqlx::query_scalar(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_database_error(table, e))?;
        into_records(rows)
    }

    fn insert_sql(
        &self,
        table: &ValidatedTableName,
        rows: &[&Record],
        params: &mut Vec<Value>,
    ) -> Result<(String, Vec<ValidatedFieldName>), StoreError> {
        // Union of the columns of every row, in first-seen order
        let mut columns: Vec<ValidatedFieldName> = Vec::new();
        for row in rows {
            for column in row.keys() {
                if !columns.iter().any(|c| c.as_str() == column) {
                    columns.push(ValidatedFieldName::new(column)?);
                }
            }
        }

        if columns.is_empty() {
            return match rows {
                [_] => Ok((format!("INSERT INTO {} DEFAULT VALUES", table.quoted()), columns)),
                _ => Err(StoreError::InvalidRequest(
                    "multi-row insert needs at least one column".to_string(),
                )),
            };
        }

        let tuples = rows
            .iter()
            .map(|row| {
                let values = columns
                    .iter()
                    .map(|column| match row.get(column.as_str()) {
                        Some(value) => {
                            params.push(value.clone());
                            format!("${}", params.len())
                        }
                        None => "DEFAULT".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", values)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table.quoted(),
            SqlGenerator::build_column_list(Some(&columns)),
            tuples
        );
        Ok((sql, columns))
    }

    fn write_sql(
        &self,
        request: &WriteRequest,
        table: &ValidatedTableName,
    ) -> Result<(String, Vec<Value>), StoreError> {
        let mut params = Vec::new();

        let statement = match request.operation {
            WriteOperation::Insert => self.insert_sql(table, &request.rows()?, &mut params)?.0,
            WriteOperation::Upsert => {
                let (insert, columns) = self.insert_sql(table, &request.rows()?, &mut params)?;
                let conflict_columns = if request.conflict_columns.is_empty() {
                    vec![ValidatedFieldName::new(&self.id_column)?]
                } else {
                    request
                        .conflict_columns
                        .iter()
                        .map(|column| ValidatedFieldName::new(column))
                        .collect::<Result<Vec<_>, _>>()?
                };

                let updates = columns
                    .iter()
                    .filter(|column| !conflict_columns.contains(column))
                    .map(|column| format!("{0} = EXCLUDED.{0}", column.quoted()))
                    .collect::<Vec<_>>();

                let action = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", updates.join(", "))
                };

                format!(
                    "{} ON CONFLICT ({}) {}",
                    insert,
                    SqlGenerator::build_column_list(Some(&conflict_columns)),
                    action
                )
            }
            WriteOperation::Update => {
                let rows = request.rows()?;
                let [changes] = rows.as_slice() else {
                    return Err(StoreError::InvalidRequest(
                        "update payload must be a single object".to_string(),
                    ));
                };
                if changes.is_empty() {
                    return Err(StoreError::InvalidRequest(
                        "update payload has no columns".to_string(),
                    ));
                }

                let assignments = changes
                    .iter()
                    .map(|(column, value)| {
                        let column = ValidatedFieldName::new(column)?;
                        params.push(value.clone());
                        Ok(format!("{} = ${}", column.quoted(), params.len()))
                    })
                    .collect::<Result<Vec<_>, StoreError>>()?;

                // WHERE placeholders continue after the SET placeholders
                let (where_clause, where_params) =
                    SqlGenerator::build_where_clause(request.query.conditions(), params.len() + 1)?;
                params.extend(where_params);

                format!(
                    "UPDATE {} SET {} {}",
                    table.quoted(),
                    assignments.join(", "),
                    where_clause
                )
            }
            WriteOperation::Delete => {
                let (where_clause, where_params) =
                    SqlGenerator::build_where_clause(request.query.conditions(), 1)?;
                params.extend(where_params);
                format!("DELETE FROM {} {}", table.quoted(), where_clause)
            }
        };

        let returning = parse_column_list(request.returning.as_deref())?;
        let sql = format!(
            "WITH {alias} AS ({statement} RETURNING {columns}) SELECT to_jsonb({alias}) FROM {alias}",
            alias = CHANGED_ALIAS,
            statement = statement.trim_end(),
            columns = SqlGenerator::build_column_list(returning.as_deref()),
        );
        Ok((sql, params))
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn read(&self, request: &ReadRequest) -> Result<Vec<Record>, StoreError> {
        let table = ValidatedTableName::new(&request.table)?;
        let columns = parse_column_list(request.select.as_deref())?;
        let (where_clause, order_clause, limit_clause, params) = request.query.build()?;

        let sql = format!(
            "SELECT {} FROM {} AS {} {} {} {}",
            row_projection(columns.as_deref(), ROW_ALIAS),
            table.quoted(),
            ROW_ALIAS,
            where_clause,
            order_clause,
            limit_clause
        );

        self.fetch_json(&request.table, sql.trim_end(), params).await
    }

    async fn write(&self, request: &WriteRequest) -> Result<Vec<Record>, StoreError> {
        let table = ValidatedTableName::new(&request.table)?;
        let (sql, params) = self.write_sql(request, &table)?;
        let rows = self.fetch_json(&request.table, &sql, params).await?;

        crate::debug_log!(
            table = %request.table,
            operation = %request.operation,
            rows = rows.len(),
            "write applied"
        );
        Ok(rows)
    }

    async fn open_change_channel(
        &self,
        table: &str,
        filter: Option<&QueryBuilder>,
        buffer: usize,
    ) -> Result<ChangeChannel, StoreError> {
        let table = ValidatedTableName::new(table)?;
        if let Some(filter) = filter {
            filter.build_where_clause()?;
        }

        let channel_name = format!("{}_changes", table.as_str());
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&channel_name).await?;

        let (tx, rx) = mpsc::channel(buffer.max(1));
        let table_name = table.as_str().to_string();
        let filter = filter.cloned();

        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    notification = listener.recv() => match notification {
                        Ok(notification) => {
                            let payload: NotifyPayload = match serde_json::from_str(notification.payload()) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    tracing::warn!(channel = %notification.channel(), error = %e, "malformed change notification");
                                    continue;
                                }
                            };

                            let mut event = ChangeEvent::new(payload.event_type, table_name.as_str());
                            event.new = payload.new;
                            event.old = payload.old;

                            let selected = match (&filter, event.record()) {
                                (Some(filter), Some(record)) => filter.matches(record),
                                _ => true,
                            };
                            if selected && tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            // PgListener reconnects on the next recv
                            tracing::warn!(table = %table_name, error = %e, "change listener error, retrying");
                            tokio::time::sleep(LISTENER_RETRY).await;
                        }
                    }
                }
            }
            crate::debug_log!(table = %table_name, "change listener stopped");
        });

        let abort = forwarder.abort_handle();
        tracing::debug!(channel = %channel_name, "change channel opened");
        Ok(ChangeChannel::new(rx, ChannelCloser::new(move || abort.abort())))
    }
}
