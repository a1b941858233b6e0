use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to connect to {backend} store: {source}")]
    Connection {
        backend: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query on {table} failed: {source}")]
    Query {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Append to {table} failed: {source}")]
    Write {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Column {column} has type {type_name}, which cannot be archived")]
    UnsupportedType { column: String, type_name: String },

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),
}

impl DbError {
    pub(crate) fn query(table: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |source| DbError::Query {
            table: table.to_string(),
            source,
        }
    }

    pub(crate) fn write(table: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |source| DbError::Write {
            table: table.to_string(),
            source,
        }
    }

    pub(crate) fn connection(backend: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| DbError::Connection { backend, source }
    }
}

pub type DbResult<T> = Result<T, DbError>;
