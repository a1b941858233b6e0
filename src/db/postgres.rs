use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    Connection, Postgres, QueryBuilder, Row, TypeInfo, ValueRef,
    postgres::{PgConnectOptions, PgConnection, PgRow},
    query_builder::Separated,
};

use super::{
    BackupStore, DbError, DbResult, RowSet, SourceStore, StoreBackend, Value, collect_rows,
    column_list, column_name, quote_identifier, release, rows_per_statement,
};
use crate::{archival::Cutoff, config::NetworkStoreConfig};

const BACKEND: &str = "postgres";
const DEFAULT_PORT: u16 = 5432;
const MAX_BIND_PARAMS: usize = 65_535;

pub struct PostgresStore {
    config: NetworkStoreConfig,
}

impl PostgresStore {
    pub fn new(config: NetworkStoreConfig) -> Self {
        Self { config }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.effective_port(DEFAULT_PORT))
            .username(&self.config.username)
            .database(&self.config.database);

        match &self.config.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    async fn connect(&self) -> DbResult<PgConnection> {
        PgConnection::connect_with(&self.connect_options())
            .await
            .map_err(DbError::connection(BACKEND))
    }
}

impl StoreBackend for PostgresStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[async_trait]
impl SourceStore for PostgresStore {
    async fn select_older_than(
        &self,
        table: &str,
        column: &str,
        cutoff: &Cutoff,
    ) -> DbResult<RowSet> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} < $1",
            quote_identifier(table, '"')?,
            quote_identifier(column, '"')?
        );

        let mut conn = self.connect().await?;
        let fetched = sqlx::query(&sql)
            .bind(cutoff.timestamp())
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
            "DELETE FROM {} WHERE {} < $1",
            quote_identifier(table, '"')?,
            quote_identifier(column, '"')?
        );

        let mut conn = self.connect().await?;
        let result = sqlx::query(&sql)
            .bind(cutoff.timestamp())
            .execute(&mut conn)
            .await;
        release(conn, BACKEND).await;

        Ok(result.map_err(DbError::query(table))?.rows_affected())
    }
}

#[async_trait]
impl BackupStore for PostgresStore {
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
    conn: &mut PgConnection,
    table: &str,
    target: &str,
    rows: &RowSet,
) -> DbResult<u64> {
    let prefix = format!("INSERT INTO {target} ({}) ", column_list(&rows.columns, '"'));
    let per_statement = rows_per_statement(rows.columns.len(), MAX_BIND_PARAMS);
    let types = column_types(conn, table, target, &rows.columns).await?;

    let mut tx = conn.begin().await.map_err(DbError::write(table))?;
    let mut inserted = 0;

    for chunk in rows.rows.chunks(per_statement) {
        let result = build_insert(&prefix, chunk, &types)
            .build()
            .execute(&mut *tx)
            .await
            .map_err(DbError::write(table))?;
        inserted += result.rows_affected();
    }

    tx.commit().await.map_err(DbError::write(table))?;
    Ok(inserted)
}

/// Declared type of each destination column, in `columns` order.
///
/// Text values are cast to these types, since a snapshot from a store
/// without native timestamps carries them as text.
async fn column_types(
    conn: &mut PgConnection,
    table: &str,
    target: &str,
    columns: &[String],
) -> DbResult<Vec<Option<String>>> {
    let declared: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
        "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
         FROM pg_attribute a \
         WHERE a.attrelid = $1::regclass AND a.attnum > 0 AND NOT a.attisdropped",
    )
    .bind(target)
    .fetch_all(&mut *conn)
    .await
    .map_err(DbError::write(table))?
    .into_iter()
    .collect();

    Ok(columns.iter().map(|c| declared.get(c).cloned()).collect())
}

fn build_insert<'a>(
    prefix: &str,
    rows: &'a [Vec<Value>],
    types: &'a [Option<String>],
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(prefix);
    builder.push_values(rows, |mut b, row| {
        for (value, column_type) in row.iter().zip(types) {
            push_value(&mut b, value, column_type.as_deref());
        }
    });
    builder
}

/// `NULL` is written as a literal so the server infers the column type.
fn push_value(
    b: &mut Separated<'_, '_, Postgres, &'static str>,
    value: &Value,
    column_type: Option<&str>,
) {
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
        Value::Decimal(v) => {
            b.push_bind(*v);
        }
        Value::Text(v) => match column_type {
            Some(column_type) => {
                b.push("CAST(");
                b.push_bind_unseparated(v.clone());
                b.push_unseparated(format!(" AS {column_type})"));
            }
            None => {
                b.push_bind(v.clone());
            }
        },
        Value::Bytes(v) => {
            b.push_bind(v.clone());
        }
        Value::Date(v) => {
            b.push_bind(*v);
        }
        Value::Timestamp(v) => {
            b.push_bind(*v);
        }
        Value::TimestampTz(v) => {
            b.push_bind(*v);
        }
        Value::Uuid(v) => {
            b.push_bind(*v);
        }
        Value::Json(v) => {
            b.push_bind(v.clone());
        }
    }
}

fn decode_value(row: &PgRow, index: usize) -> DbResult<Value> {
    let raw = row.try_get_raw(index).map_err(|_| DbError::UnsupportedType {
        column: column_name(row, index),
        type_name: "unknown".into(),
    })?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool),
        "INT2" => row.try_get::<i16, _>(index).map(|v| Value::Int(v.into())),
        "INT4" => row.try_get::<i32, _>(index).map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<i64, _>(index).map(Value::Int),
        "FLOAT4" => row.try_get::<f32, _>(index).map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<f64, _>(index).map(Value::Float),
        "NUMERIC" => row.try_get::<Decimal, _>(index).map(Value::Decimal),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        "DATE" => row.try_get::<NaiveDate, _>(index).map(Value::Date),
        "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(index).map(Value::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(Value::TimestampTz),
        "UUID" => row.try_get::<uuid::Uuid, _>(index).map(Value::Uuid),
        "JSON" | "JSONB" => row
            .try_get::<serde_json::Value, _>(index)
            .map(Value::Json),
        _ => row.try_get::<String, _>(index).map(Value::Text),
    };

    decoded.map_err(|_| DbError::UnsupportedType {
        column: column_name(row, index),
        type_name,
    })
}
