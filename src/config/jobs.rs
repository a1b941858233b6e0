//! Archival job configuration.
//!
//! Each `[[jobs]]` entry is one table set archived with its own cutoff.
//! Sink names are paired with `table_names` by position.
//!
//! # Example
//!
//! ```toml
//! [[jobs]]
//! name = "sensors"
//! table_names = "sensor_a, sensor_b"
//! backup_duration_days = 7
//! backup_table_names = "sensor_a_archive, sensor_b_archive"
//! blob_names = "sensor_a.csv, sensor_b.csv"
//! timestamp_column = "Date_time"
//! ```

use serde::{Deserialize, Serialize};

use super::{ConfigError, lists::string_or_list};
use crate::{archival::Instruction, db::is_valid_identifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Label used in logs and reports. Defaults to the joined table names.
    #[serde(default)]
    pub name: Option<String>,

    /// Source tables, in processing order.
    #[serde(deserialize_with = "string_or_list")]
    pub table_names: Vec<String>,

    /// Rows whose timestamp is older than this many days are archived.
    /// Fractional values are allowed.
    #[serde(alias = "backup_duration")]
    pub backup_duration_days: f64,

    /// Destination tables in the backup database, one per source table.
    /// Required when `to_db` is configured.
    #[serde(default, deserialize_with = "string_or_list")]
    pub backup_table_names: Vec<String>,

    /// Object names in the blob container, one per source table.
    /// Required when `to_azure` is configured.
    #[serde(default, deserialize_with = "string_or_list")]
    pub blob_names: Vec<String>,

    /// Column compared against the cutoff.
    /// Default: `Date_time`
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
}

fn default_timestamp_column() -> String {
    "Date_time".to_string()
}

impl JobConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.table_names.join(","))
    }

    pub fn validate(&self, index: usize, instructions: &[Instruction]) -> Result<(), ConfigError> {
        let label = format!("jobs[{index}]");

        if self.table_names.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{label}: table_names cannot be empty"
            )));
        }

        if !self.backup_duration_days.is_finite() || self.backup_duration_days < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{label}: backup_duration_days must be a non-negative number, got {}",
                self.backup_duration_days
            )));
        }

        for table in &self.table_names {
            check_identifier(&label, "table_names", table)?;
        }
        check_identifier(&label, "timestamp_column", &self.timestamp_column)?;

        if instructions.contains(&Instruction::ToDb) {
            check_paired(&label, "backup_table_names", &self.backup_table_names, &self.table_names)?;
            for table in &self.backup_table_names {
                check_identifier(&label, "backup_table_names", table)?;
            }
        }

        if instructions.contains(&Instruction::ToAzure) {
            check_paired(&label, "blob_names", &self.blob_names, &self.table_names)?;
            for blob in &self.blob_names {
                if blob.contains("..") || blob.starts_with('/') {
                    return Err(ConfigError::Validation(format!(
                        "{label}: blob name '{blob}' must be a relative object name"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn check_identifier(label: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{label}: {field} entry '{value}' is not a valid SQL identifier"
        )))
    }
}

fn check_paired(
    label: &str,
    field: &str,
    names: &[String],
    tables: &[String],
) -> Result<(), ConfigError> {
    if names.len() != tables.len() {
        return Err(ConfigError::Validation(format!(
            "{label}: {field} has {} entries but table_names has {}; they are paired by position",
            names.len(),
            tables.len()
        )));
    }
    Ok(())
}
