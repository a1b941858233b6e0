//! Configuration module for the archival worker.
//!
//! The worker is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax. The file is re-read at
//! the start of every scheduled run.
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! interval_minutes = 1440
//! instructions = "to_db, delete"
//!
//! [source]
//! type = "mysql"
//! host = "10.0.0.12"
//! username = "archiver"
//! password = "${SOURCE_DB_PASSWORD}"
//! database = "telemetry"
//!
//! [backup_db]
//! type = "postgres"
//! host = "backup.internal"
//! username = "archiver"
//! password = "${BACKUP_DB_PASSWORD}"
//! database = "telemetry_archive"
//!
//! [[jobs]]
//! table_names = "sensor_a"
//! backup_duration_days = 7
//! backup_table_names = "sensor_a_archive"
//! ```

mod blob;
mod jobs;
pub mod lists;
mod observability;
mod safety;
mod scheduler;
mod store;

use std::path::Path;

pub use blob::*;
pub use jobs::*;
pub use observability::*;
pub use safety::*;
pub use scheduler::*;
use serde::{Deserialize, Serialize};
pub use store::*;

use crate::archival::Instruction;

/// Root configuration for the archival worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ArchivistConfig {
    /// Run interval and instruction order.
    pub scheduler: SchedulerConfig,

    /// Store rows are archived from and deleted in.
    #[serde(alias = "db")]
    pub source: StoreConfig,

    /// Store snapshots are appended to by `to_db`.
    /// Required when `to_db` is configured.
    #[serde(default)]
    pub backup_db: Option<StoreConfig>,

    /// Object store snapshots are uploaded to by `to_azure`.
    /// Required when `to_azure` is configured.
    #[serde(default)]
    pub blob: Option<BlobConfig>,

    /// Table sets to archive. Each job gets its own cutoff and snapshots.
    pub jobs: Vec<JobConfig>,

    /// Safety settings.
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Per-operation timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ArchivistConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Detect backends that are not compiled in before typed deserialization,
        // which would otherwise fail with an opaque "unknown variant" error
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: ArchivistConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.source.validate("source")?;
        self.timeouts.validate()?;

        if self.scheduler.has(&Instruction::ToDb) && self.backup_db.is_none() {
            return Err(ConfigError::Validation(
                "the to_db instruction requires a [backup_db] section".into(),
            ));
        }
        if let Some(backup) = &self.backup_db {
            backup.validate("backup_db")?;
        }

        if self.scheduler.has(&Instruction::ToAzure) && self.blob.is_none() {
            return Err(ConfigError::Validation(
                "the to_azure instruction requires a [blob] section".into(),
            ));
        }
        if let Some(blob) = &self.blob {
            blob.validate()?;
        }

        if self.jobs.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[jobs]] entry is required".into(),
            ));
        }
        for (index, job) in self.jobs.iter().enumerate() {
            job.validate(index, &self.scheduler.instructions)?;
        }

        if self.safety.dry_run {
            tracing::info!("Safety dry_run is enabled; delete steps will not remove rows");
        }

        Ok(())
    }

    /// Generate the JSON schema for the configuration file.
    #[cfg(feature = "json-schema")]
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ArchivistConfig)
    }

    /// Generate the JSON schema as a pretty-printed JSON string.
    #[cfg(feature = "json-schema")]
    pub fn json_schema_string() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::json_schema())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated configuration values before typed deserialization.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    for section in ["source", "db", "backup_db"] {
        if let Some(type_val) = raw
            .get(section)
            .and_then(|v| v.get("type"))
            .and_then(|v| v.as_str())
        {
            check_store_feature(section, type_val, &mut issues);
        }
    }

    if let Some(type_val) = raw
        .get("blob")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_blob_feature(type_val, &mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}\n\
         Or use the 'full' profile: cargo build --features full"
    )))
}

fn check_store_feature(_section: &str, type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "database-sqlite"))]
        "sqlite" => _issues.push((
            format!("[{_section}] type 'sqlite' requires the 'database-sqlite' feature"),
            "database-sqlite",
        )),
        #[cfg(not(feature = "database-postgres"))]
        "postgres" => _issues.push((
            format!("[{_section}] type 'postgres' requires the 'database-postgres' feature"),
            "database-postgres",
        )),
        #[cfg(not(feature = "database-mysql"))]
        "mysql" => _issues.push((
            format!("[{_section}] type 'mysql' requires the 'database-mysql' feature"),
            "database-mysql",
        )),
        _ => {}
    }
}

fn check_blob_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "blob-azure"))]
        "azure" => _issues.push((
            "[blob] type 'azure' requires the 'blob-azure' feature".into(),
            "blob-azure",
        )),
        _ => {}
    }
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = env_var_pattern();
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

fn env_var_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}
