use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    Connection, MySql, QueryBuilder, Row, TypeInfo, ValueRef,
    mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow},
    query_builder::Separated,
};

use super::{
    BackupStore, DbError, DbResult, RowSet, SourceStore, StoreBackend, Value, collect_rows,
    column_list, column_name, quote_identifier, release, rows_per_statement,
};
use crate::{archival::Cutoff, config::NetworkStoreConfig};

const BACKEND: &str = "mysql";
const DEFAULT_PORT: u16 = 3306;
const MAX_BIND_PARAMS: usize = 65_535;

pub struct MySqlStore {
    config: NetworkStoreConfig,
}

impl MySqlStore {
    pub fn new(config: NetworkStoreConfig) -> Self {
        Self { config }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.effective_port(DEFAULT_PORT))
            .username(&self.config.username)
            .database(&self.config.database);

        match &self.config.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    async fn connect(&self) -> DbResult<MySqlConnection> {
        MySqlConnection::connect_with(&self.connect_options())
            .await
            .map_err(DbError::connection(BACKEND))
    }
}

impl StoreBackend for MySqlStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[async_trait]
impl SourceStore for MySqlStore {
    async fn select_older_than(
        &self,
        table: &str,
        column: &str,
        cutoff: &Cutoff,
    ) -> DbResult<RowSet> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} < ?",
            quote_identifier(table, '`')?,
            quote_identifier(column, '`')?
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
            "DELETE FROM {} WHERE {} < ?",
            quote_identifier(table, '`')?,
            quote_identifier(column, '`')?
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
impl BackupStore for MySqlStore {
    async fn append(&self, table: &str, rows: &RowSet) -> DbResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let target = quote_identifier(table, '`')?;

        let mut conn = self.connect().await?;
        let result = insert_rows(&mut conn, table, &target, rows).await;
        release(conn, BACKEND).await;
        result
    }
}

async fn insert_rows(
    conn: &mut MySqlConnection,
    table: &str,
    target: &str,
    rows: &RowSet,
) -> DbResult<u64> {
    let prefix = format!("INSERT INTO {target} ({}) ", column_list(&rows.columns, '`'));
    let per_statement = rows_per_statement(rows.columns.len(), MAX_BIND_PARAMS);

    let mut tx = conn.begin().await.map_err(DbError::write(table))?;
    let mut inserted = 0;

    for chunk in rows.rows.chunks(per_statement) {
        let mut builder = QueryBuilder::<MySql>::new(&prefix);
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

fn push_value(b: &mut Separated<'_, '_, MySql, &'static str>, value: &Value) {
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
        Value::Text(v) => {
            b.push_bind(v.clone());
        }
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
        // CHAR(36) is the common column type for UUIDs in MySQL.
        Value::Uuid(v) => {
            b.push_bind(v.to_string());
        }
        Value::Json(v) => {
            b.push_bind(v.clone());
        }
    }
}

fn decode_value(row: &MySqlRow, index: usize) -> DbResult<Value> {
    let raw = row.try_get_raw(index).map_err(|_| DbError::UnsupportedType {
        column: column_name(row, index),
        type_name: "unknown".into(),
    })?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let decoded = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(Value::Int)
        }
        name if name.ends_with(" UNSIGNED") => row.try_get::<u64, _>(index).map(|v| {
            i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Decimal(Decimal::from(v)))
        }),
        "FLOAT" => row.try_get::<f32, _>(index).map(|v| Value::Float(v.into())),
        "DOUBLE" => row.try_get::<f64, _>(index).map(Value::Float),
        "DECIMAL" => row.try_get::<Decimal, _>(index).map(Value::Decimal),
        "DATE" => row.try_get::<NaiveDate, _>(index).map(Value::Date),
        "DATETIME" => row.try_get::<NaiveDateTime, _>(index).map(Value::Timestamp),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(Value::TimestampTz),
        "JSON" => row
            .try_get::<serde_json::Value, _>(index)
            .map(Value::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            row.try_get::<Vec<u8>, _>(index).map(Value::Bytes)
        }
        _ => row.try_get::<String, _>(index).map(Value::Text),
    };

    decoded.map_err(|_| DbError::UnsupportedType {
        column: column_name(row, index),
        type_name,
    })
}
