//! Relational store access for archival.
//!
//! The orchestrator only needs four capabilities from a store: read the rows
//! older than a cutoff, delete them, append rows to a table, and name itself
//! for logs. [`SourceStore`] and [`BackupStore`] expose exactly those, with
//! one implementation per compiled-in backend.
//!
//! Connections are opened per operation and closed before the operation
//! returns, on success and on error alike. Nothing is pooled across runs.

mod error;
#[cfg(feature = "database-mysql")]
pub mod mysql;
#[cfg(feature = "database-postgres")]
pub mod postgres;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;
mod value;

use std::sync::Arc;

use async_trait::async_trait;
pub use error::{DbError, DbResult};
use sqlx::{Column, Row};
pub use value::{RowSet, Value};

use crate::{archival::Cutoff, config::StoreConfig};

/// Backend identification shared by both store roles.
pub trait StoreBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;
}

/// The store rows are archived from.
#[async_trait]
pub trait SourceStore: StoreBackend {
    /// All rows of `table` whose `column` is strictly less than `cutoff`.
    async fn select_older_than(
        &self,
        table: &str,
        column: &str,
        cutoff: &Cutoff,
    ) -> DbResult<RowSet>;

    /// Delete the rows of `table` whose `column` is strictly less than
    /// `cutoff`, returning the number of rows removed.
    async fn delete_older_than(&self, table: &str, column: &str, cutoff: &Cutoff)
    -> DbResult<u64>;
}

/// The store snapshots are appended to.
#[async_trait]
pub trait BackupStore: StoreBackend {
    /// Insert every row of `rows` into `table` in a single transaction.
    ///
    /// Existing rows are never touched. The table must already exist with
    /// compatible columns.
    async fn append(&self, table: &str, rows: &RowSet) -> DbResult<u64>;
}

/// Build the source store for `config`. No connection is opened yet.
pub fn source_store(config: &StoreConfig) -> Arc<dyn SourceStore> {
    match config {
        #[cfg(feature = "database-sqlite")]
        StoreConfig::Sqlite(c) => Arc::new(sqlite::SqliteStore::new(c.clone())),
        #[cfg(feature = "database-postgres")]
        StoreConfig::Postgres(c) => Arc::new(postgres::PostgresStore::new(c.clone())),
        #[cfg(feature = "database-mysql")]
        StoreConfig::Mysql(c) => Arc::new(mysql::MySqlStore::new(c.clone())),
    }
}

/// Build the backup store for `config`. No connection is opened yet.
pub fn backup_store(config: &StoreConfig) -> Arc<dyn BackupStore> {
    match config {
        #[cfg(feature = "database-sqlite")]
        StoreConfig::Sqlite(c) => Arc::new(sqlite::SqliteStore::new(c.clone())),
        #[cfg(feature = "database-postgres")]
        StoreConfig::Postgres(c) => Arc::new(postgres::PostgresStore::new(c.clone())),
        #[cfg(feature = "database-mysql")]
        StoreConfig::Mysql(c) => Arc::new(mysql::MySqlStore::new(c.clone())),
    }
}

const MAX_IDENTIFIER_LEN: usize = 64;

/// Whether `name` is a plain or schema-qualified identifier
/// (`table` or `schema.table`) made of letters, digits, `_` and `$`.
pub fn is_valid_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }

    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
            _ => return false,
        }
        part.len() <= MAX_IDENTIFIER_LEN
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    })
}

/// Validate and quote a configured table or column name.
pub(crate) fn quote_identifier(name: &str, quote: char) -> DbResult<String> {
    if !is_valid_identifier(name) {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(name
        .split('.')
        .map(|part| format!("{quote}{part}{quote}"))
        .collect::<Vec<_>>()
        .join("."))
}

/// Quote a column name reported by the store itself, escaping the quote
/// character instead of rejecting it.
pub(crate) fn escape_identifier(name: &str, quote: char) -> String {
    let doubled = format!("{quote}{quote}");
    format!("{quote}{}{quote}", name.replace(quote, &doubled))
}

/// Comma-separated, escaped column list for an INSERT statement.
pub(crate) fn column_list(columns: &[String], quote: char) -> String {
    columns
        .iter()
        .map(|c| escape_identifier(c, quote))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rows per INSERT statement so that a statement stays under `max_params`
/// bind parameters.
pub(crate) fn rows_per_statement(columns: usize, max_params: usize) -> usize {
    (max_params / columns.max(1)).max(1)
}

/// Decode every fetched row with a backend-specific value decoder.
pub(crate) fn collect_rows<R, F>(rows: &[R], decode: F) -> DbResult<RowSet>
where
    R: Row,
    F: Fn(&R, usize) -> DbResult<Value>,
{
    let Some(first) = rows.first() else {
        return Ok(RowSet::default());
    };

    let columns: Vec<String> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let decoded = rows
        .iter()
        .map(|row| {
            (0..columns.len())
                .map(|index| decode(row, index))
                .collect::<DbResult<Vec<_>>>()
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(RowSet::new(columns, decoded))
}

/// Name of column `index` of `row`, for error messages.
pub(crate) fn column_name<R: Row>(row: &R, index: usize) -> String {
    row.columns()
        .get(index)
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| format!("#{index}"))
}

/// Close a per-operation connection. Close failures are not actionable and
/// are only logged.
pub(crate) async fn release<C: sqlx::Connection>(conn: C, backend: &'static str) {
    if let Err(e) = conn.close().await {
        tracing::debug!(backend, error = %e, "Error closing store connection");
    }
}
