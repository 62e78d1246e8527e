use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};

use super::TableSpec;

/// One persisted row, keyed by column name. `serde_json`'s preserve_order
/// feature keeps the column order stable in responses.
pub type JsonRow = Map<String, Value>;

/// Relational access for the tables in `TableSpec`. The ingestion pipeline
/// and the CRUD handlers only ever talk to storage through this trait, which
/// keeps the pipeline testable without a running database.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn list(&self, spec: &TableSpec) -> Result<Vec<JsonRow>>;

    async fn find_by_column(
        &self,
        spec: &TableSpec,
        column: &str,
        value: &Value,
    ) -> Result<Vec<JsonRow>>;

    /// Duplicate lookup: does any row have `column = value`?
    async fn exists(&self, spec: &TableSpec, column: &str, value: &Value) -> Result<bool>;

    /// Parameterized insert; `columns` and `values` are matched by position.
    async fn insert(&self, spec: &TableSpec, columns: &[&str], values: &[Value]) -> Result<()>;

    /// Returns the number of rows affected.
    async fn update_by_id(&self, spec: &TableSpec, id: i64, changes: &JsonRow) -> Result<u64>;

    async fn delete_by_id(&self, spec: &TableSpec, id: i64) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgRowStore {
    pool: PgPool,
}

impl PgRowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn check_column(spec: &TableSpec, column: &str) -> Result<()> {
    if spec.has_column(column) {
        Ok(())
    } else {
        bail!("column {column} is not part of table {}", spec.table);
    }
}

/// Binds a JSON value as a typed SQL parameter. Identifiers never take this
/// path; only values do.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &PgRow) -> JsonRow {
    let mut map = Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), decode_cell(row, idx, col.type_info().name()));
    }
    map
}

fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "INT2" => opt(row.try_get::<Option<i16>, _>(idx)).map_or(Value::Null, Value::from),
        "INT4" => opt(row.try_get::<Option<i32>, _>(idx)).map_or(Value::Null, Value::from),
        "INT8" => opt(row.try_get::<Option<i64>, _>(idx)).map_or(Value::Null, Value::from),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(idx)).map_or(Value::Null, Value::from),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(idx)).map_or(Value::Null, Value::from),
        "BOOL" => opt(row.try_get::<Option<bool>, _>(idx)).map_or(Value::Null, Value::from),
        "TIMESTAMP" => opt(row.try_get::<Option<chrono::NaiveDateTime>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "TIMESTAMPTZ" => opt(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        "DATE" => opt(row.try_get::<Option<chrono::NaiveDate>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "TIME" => opt(row.try_get::<Option<chrono::NaiveTime>, _>(idx))
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        // TEXT, VARCHAR, BPCHAR and anything else textual.
        _ => opt(row.try_get::<Option<String>, _>(idx)).map_or(Value::Null, Value::String),
    }
}

fn opt<T>(res: Result<Option<T>, sqlx::Error>) -> Option<T> {
    res.ok().flatten()
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn list(&self, spec: &TableSpec) -> Result<Vec<JsonRow>> {
        let sql = format!("SELECT * FROM {}", spec.table);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn find_by_column(
        &self,
        spec: &TableSpec,
        column: &str,
        value: &Value,
    ) -> Result<Vec<JsonRow>> {
        check_column(spec, column)?;
        let sql = format!("SELECT * FROM {} WHERE {} = $1", spec.table, column);
        let rows = bind_value(sqlx::query(&sql), value)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn exists(&self, spec: &TableSpec, column: &str, value: &Value) -> Result<bool> {
        check_column(spec, column)?;
        let sql = format!("SELECT 1 FROM {} WHERE {} = $1 LIMIT 1", spec.table, column);
        let row = bind_value(sqlx::query(&sql), value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, spec: &TableSpec, columns: &[&str], values: &[Value]) -> Result<()> {
        if columns.is_empty() || columns.len() != values.len() {
            bail!("insert into {} with mismatched column set", spec.table);
        }
        for column in columns {
            check_column(spec, column)?;
        }
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            spec.table,
            columns.join(", "),
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn update_by_id(&self, spec: &TableSpec, id: i64, changes: &JsonRow) -> Result<u64> {
        if changes.is_empty() {
            bail!("update of {} with no columns", spec.table);
        }
        for column in changes.keys() {
            check_column(spec, column)?;
        }
        let assignments = changes
            .keys()
            .enumerate()
            .map(|(i, column)| format!("{} = ${}", column, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            spec.table,
            assignments,
            spec.id_column,
            changes.len() + 1
        );
        let mut query = sqlx::query(&sql);
        for value in changes.values() {
            query = bind_value(query, value);
        }
        let result = query.bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_id(&self, spec: &TableSpec, id: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            spec.table, spec.id_column
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
