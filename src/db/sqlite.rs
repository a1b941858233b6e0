use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    Connection, QueryBuilder, Row, Sqlite, TypeInfo, ValueRef,
    query_builder::Separated,
    sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow},
};

use super::{
    BackupStore, DbError, DbResult, RowSet, SourceStore, StoreBackend, Value, collect_rows,
    column_list, column_name, quote_identifier, release, rows_per_statement,
};
use crate::{archival::Cutoff, config::SqliteStoreConfig};

const BACKEND: &str = "sqlite";

/// SQLite caps bound parameters per statement at 32766.
const MAX_BIND_PARAMS: usize = 32_000;

pub struct SqliteStore {
    config: SqliteStoreConfig,
}

impl SqliteStore {
    pub fn new(config: SqliteStoreConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> DbResult<SqliteConnection> {
        let options = SqliteConnectOptions::new()
            .filename(&self.config.path)
            .create_if_missing(false)
            .busy_timeout(Duration::from_millis(self.config.busy_timeout_ms));

        SqliteConnection::connect_with(&options)
            .await
            .map_err(DbError::connection(BACKEND))
    }
}

impl StoreBackend for SqliteStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[async_trait]
impl SourceStore for SqliteStore {
    async fn select_older_than(
        &self,
        table: &str,
        column: &str,
        cutoff: &Cutoff,
    ) -> DbResult<RowSet> {
        // Timestamps are stored as text; the fixed-width format compares
        // lexicographically in time order.
        let sql = format!(
            "SELECT * FROM {} WHERE {} < ?",
            quote_identifier(table, '"')?,
            quote_identifier(column, '"')?
        );

        let mut conn = self.connect().await?;
        let fetched = sqlx::query(&sql)
            .bind(cutoff.formatted())
            .fetch_all(&mut conn)
            .await;
        release(conn, BACKEND).await;

        let rows = fetched.map_err(DbError::query(table))?;
        collect_rows(&rows, decode_value)
    }

    async fn delete_older_than(
        &self,
        table: &str,
        column: &str,
        cutoff: &Cutoff,
    ) -> DbResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {} < ?",
            quote_identifier(table, '"')?,
            quote_identifier(column, '"')?
        );

        let mut conn = self.connect().await?;
        let result = sqlx::query(&sql)
            .bind(cutoff.formatted())
            .execute(&mut conn)
            .await;
        release(conn, BACKEND).await;

        Ok(result.map_err(DbError::query(table))?.rows_affected())
    }
}

#[async_trait]
impl BackupStore for SqliteStore {
    async fn append(&self, table: &str, rows: &RowSet) -> DbResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let target = quote_identifier(table, '"')?;

        let mut conn = self.connect().await?;
        let result = insert_rows(&mut conn, table, &target, rows).await;
        release(conn, BACKEND).await;
        result
    }
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    table: &str,
    target: &str,
    rows: &RowSet,
) -> DbResult<u64> {
    let prefix = format!("INSERT INTO {target} ({}) ", column_list(&rows.columns, '"'));
    let per_statement = rows_per_statement(rows.columns.len(), MAX_BIND_PARAMS);

    let mut tx = conn.begin().await.map_err(DbError::write(table))?;
    let mut inserted = 0;

    for chunk in rows.rows.chunks(per_statement) {
        let mut builder = QueryBuilder::<Sqlite>::new(&prefix);
        builder.push_values(chunk, |mut b, row| {
            for value in row {
                push_value(&mut b, value);
            }
        });

        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(DbError::write(table))?;
        inserted += result.rows_affected();
    }

    tx.commit().await.map_err(DbError::write(table))?;
    Ok(inserted)
}

fn push_value(b: &mut Separated<'_, '_, Sqlite, &'static str>, value: &Value) {
    match value {
        Value::Null => {
            b.push("NULL");
        }
        Value::Bool(v) => {
            b.push_bind(*v);
        }
        Value::Int(v) => {
            b.push_bind(*v);
        }
        Value::Float(v) => {
            b.push_bind(*v);
        }
        Value::Bytes(v) => {
            b.push_bind(v.clone());
        }
        // Timestamps keep their fractional seconds; whole seconds render
        // exactly like the cutoff, so text comparisons stay ordered.
        Value::Decimal(_)
        | Value::Text(_)
        | Value::Date(_)
        | Value::Timestamp(_)
        | Value::TimestampTz(_)
        | Value::Uuid(_)
        | Value::Json(_) => {
            b.push_bind(value.render());
        }
    }
}

fn decode_value(row: &SqliteRow, index: usize) -> DbResult<Value> {
    let raw = row.try_get_raw(index).map_err(|_| DbError::UnsupportedType {
        column: column_name(row, index),
        type_name: "unknown".into(),
    })?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    // Storage class of the value itself, not the declared column type.
    let decoded = match type_name.as_str() {
        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(Value::Int)
        }
        "REAL" | "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(index).map(Value::Float),
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get::<String, _>(index).map(Value::Text),
    };

    decoded.map_err(|_| DbError::UnsupportedType {
        column: column_name(row, index),
        type_name,
    })
}
