//! Persistence: structured records → rows of a new PostgreSQL table.
//!
//! Each record becomes its own table named after `record.name`. Creation
//! deliberately has no `IF NOT EXISTS`: saving the same table twice is an
//! error the operator should see, not a silent append.
//!
//! Column types are inferred from the JSON values of every row:
//!
//! | values (nulls ignored)       | SQL type           |
//! |------------------------------|--------------------|
//! | all integers                 | `BIGINT`           |
//! | all numbers                  | `DOUBLE PRECISION` |
//! | all booleans                 | `BOOLEAN`          |
//! | any object or array          | `JSONB`            |
//! | anything else, or all null   | `TEXT`             |
//!
//! `CREATE TABLE` and every `INSERT` run in one transaction, so a failed
//! save leaves nothing behind.

use crate::error::TablexError;
use crate::pipeline::postprocess::sanitize_identifier;
use crate::table::StructuredTableRecord;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

/// Saves structured records somewhere durable.
pub trait RecordStore: Send + Sync {
    /// Save `record`; returns the number of rows written.
    fn save<'a>(&'a self, record: &'a StructuredTableRecord) -> BoxFuture<'a, Result<u64, TablexError>>;
}

/// SQL type of a persisted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Double,
    Boolean,
    Json,
    Text,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Json => "JSONB",
            ColumnType::Text => "TEXT",
        }
    }

    fn infer<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut ty: Option<ColumnType> = None;
        for v in values {
            let this = match v {
                Value::Null => continue,
                Value::Number(n) if n.is_i64() => ColumnType::BigInt,
                Value::Number(_) => ColumnType::Double,
                Value::Bool(_) => ColumnType::Boolean,
                Value::Object(_) | Value::Array(_) => return ColumnType::Json,
                Value::String(_) => ColumnType::Text,
            };
            ty = Some(match (ty, this) {
                (None, t) => t,
                (Some(a), b) if a == b => a,
                (Some(ColumnType::BigInt), ColumnType::Double)
                | (Some(ColumnType::Double), ColumnType::BigInt) => ColumnType::Double,
                _ => ColumnType::Text,
            });
        }
        ty.unwrap_or(ColumnType::Text)
    }
}

/// One column of the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Key in the record's row maps.
    pub key: String,
    /// Sanitised SQL identifier.
    pub name: String,
    pub ty: ColumnType,
}

/// Quote an identifier for PostgreSQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Columns of the table for `record`: the declared columns in order, then
/// any extra keys found in the rows.
pub fn column_specs(record: &StructuredTableRecord) -> Vec<ColumnSpec> {
    let mut keys: Vec<&str> = record.columns.iter().map(String::as_str).collect();
    for row in &record.data {
        for key in row.keys() {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
    }

    let mut specs: Vec<ColumnSpec> = Vec::with_capacity(keys.len());
    for (i, key) in keys.into_iter().enumerate() {
        let base = match sanitize_identifier(key) {
            s if s.is_empty() => format!("column_{i}"),
            s => s,
        };
        let mut name = base.clone();
        let mut n = 2;
        while specs.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            name = format!("{base}_{n}");
            n += 1;
        }
        let ty = ColumnType::infer(record.data.iter().filter_map(|row| row.get(key)));
        specs.push(ColumnSpec {
            key: key.to_string(),
            name,
            ty,
        });
    }
    specs
}

pub fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let cols = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), cols)
}

pub fn insert_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let params = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names,
        params
    )
}

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Convert one JSON value to a parameter of column type `ty`.
fn sql_param(value: Option<&Value>, ty: ColumnType) -> SqlParam {
    let value = value.filter(|v| !v.is_null());
    match ty {
        ColumnType::BigInt => Box::new(value.and_then(Value::as_i64)),
        ColumnType::Double => Box::new(value.and_then(Value::as_f64)),
        ColumnType::Boolean => Box::new(value.and_then(Value::as_bool)),
        ColumnType::Json => Box::new(value.cloned()),
        ColumnType::Text => Box::new(value.map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
    }
}

/// [`RecordStore`] writing to PostgreSQL.
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Connect using a libpq-style connection string or URL.
    pub async fn connect(url: &str) -> Result<Self, TablexError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| TablexError::Database {
                detail: e.to_string(),
            })?;

        // Spawn connection in background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            client: Mutex::new(client),
        })
    }

    async fn save_record(&self, record: &StructuredTableRecord) -> Result<u64, tokio_postgres::Error> {
        let columns = column_specs(record);
        let create = create_table_sql(&record.name, &columns);
        let insert = insert_sql(&record.name, &columns);
        debug!("{}", create);

        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;
        tx.batch_execute(&create).await?;
        let statement = tx.prepare(&insert).await?;

        let mut written = 0;
        for row in &record.data {
            let params: Vec<SqlParam> = columns
                .iter()
                .map(|c| sql_param(row.get(&c.key), c.ty))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            written += tx.execute(&statement, &refs).await?;
        }
        tx.commit().await?;
        Ok(written)
    }
}

impl RecordStore for PostgresStore {
    fn save<'a>(&'a self, record: &'a StructuredTableRecord) -> BoxFuture<'a, Result<u64, TablexError>> {
        Box::pin(async move {
            if column_specs(record).is_empty() {
                return Err(TablexError::Database {
                    detail: format!("record '{}' has no columns", record.name),
                });
            }
            let written = self
                .save_record(record)
                .await
                .map_err(|e| TablexError::Database {
                    detail: e.to_string(),
                })?;
            info!("Saved {} rows to table '{}'", written, record.name);
            Ok(written)
        })
    }
}
