//! Safety and timeout settings for archival runs.
//!
//! # Example
//!
//! ```toml
//! [safety]
//! dry_run = true
//!
//! [timeouts]
//! query_secs = 120
//! upload_secs = 600
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Safety settings to prevent accidental data loss.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// If true, `delete` steps log what would be deleted without deleting.
    /// Exports still run.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,
}

/// Upper bounds for each blocking operation of a run.
///
/// An operation exceeding its bound fails the same way a store error would
/// and is handled by the step's failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Reading a snapshot from the source store (connect included).
    #[serde(default = "default_timeout_secs")]
    pub query_secs: u64,

    /// Deleting rows from the source store (connect included).
    #[serde(default = "default_timeout_secs")]
    pub delete_secs: u64,

    /// Uploading one object to the blob sink.
    #[serde(default = "default_timeout_secs")]
    pub upload_secs: u64,

    /// Appending one snapshot to the backup store (connect included).
    #[serde(default = "default_timeout_secs")]
    pub append_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_secs: default_timeout_secs(),
            delete_secs: default_timeout_secs(),
            upload_secs: default_timeout_secs(),
            append_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("query_secs", self.query_secs),
            ("delete_secs", self.delete_secs),
            ("upload_secs", self.upload_secs),
            ("append_secs", self.append_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "timeouts.{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }

    pub fn append(&self) -> Duration {
        Duration::from_secs(self.append_secs)
    }
}
