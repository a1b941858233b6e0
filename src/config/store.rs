use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Connection settings for a relational store.
///
/// Used both for the `[source]` store rows are archived from and for the
/// `[backup_db]` store snapshots are appended to.
///
/// # Example
///
/// ```toml
/// [source]
/// type = "mysql"
/// host = "10.0.0.12"
/// port = 0            # 0 or omitted selects the default port
/// username = "archiver"
/// password = "${SOURCE_DB_PASSWORD}"
/// database = "telemetry"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum StoreConfig {
    /// SQLite database file.
    #[cfg(feature = "database-sqlite")]
    Sqlite(SqliteStoreConfig),

    /// PostgreSQL server.
    #[cfg(feature = "database-postgres")]
    Postgres(NetworkStoreConfig),

    /// MySQL or MariaDB server.
    #[cfg(feature = "database-mysql")]
    Mysql(NetworkStoreConfig),
}

impl StoreConfig {
    pub fn validate(&self, section: &str) -> Result<(), ConfigError> {
        match self {
            #[cfg(feature = "database-sqlite")]
            StoreConfig::Sqlite(c) => c.validate(section),
            #[cfg(feature = "database-postgres")]
            StoreConfig::Postgres(c) => c.validate(section),
            #[cfg(feature = "database-mysql")]
            StoreConfig::Mysql(c) => c.validate(section),
        }
    }

    /// Short name of the backend, for logging.
    pub fn backend_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "database-sqlite")]
            StoreConfig::Sqlite(_) => "sqlite",
            #[cfg(feature = "database-postgres")]
            StoreConfig::Postgres(_) => "postgres",
            #[cfg(feature = "database-mysql")]
            StoreConfig::Mysql(_) => "mysql",
        }
    }
}

/// SQLite store configuration.
#[cfg(feature = "database-sqlite")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the database file. The file must already exist.
    pub path: String,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

#[cfg(feature = "database-sqlite")]
impl SqliteStoreConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{section}: SQLite path cannot be empty"
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "database-sqlite")]
fn default_busy_timeout() -> u64 {
    5000
}

/// Host/port/credentials for a networked store.
///
/// Field names from the legacy INI layout (`sql_username`, `sql_ip`, ...) are
/// accepted as aliases.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct NetworkStoreConfig {
    #[serde(alias = "sql_ip")]
    pub host: String,

    /// Port. Omitted or `0` selects the backend's standard port.
    #[serde(default, alias = "sql_port")]
    pub port: Option<u16>,

    #[serde(alias = "sql_username")]
    pub username: String,

    #[serde(default, alias = "sql_password")]
    pub password: Option<String>,

    #[serde(alias = "sql_database")]
    pub database: String,
}

impl std::fmt::Debug for NetworkStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("database", &self.database)
            .finish()
    }
}

impl NetworkStoreConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{section}: host cannot be empty"
            )));
        }
        if self.username.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{section}: username cannot be empty"
            )));
        }
        if self.database.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{section}: database cannot be empty"
            )));
        }
        Ok(())
    }

    /// The port to connect to, substituting `default_port` for an unset or
    /// zero port.
    pub fn effective_port(&self, default_port: u16) -> u16 {
        match self.port {
            None | Some(0) => default_port,
            Some(port) => port,
        }
    }
}
