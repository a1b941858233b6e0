//! Scheduler configuration.
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! interval_minutes = 1440
//! instructions = "to_db, to_azure, delete"
//! utc_offset = "+05:30"
//! ```

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use super::{ConfigError, lists::string_or_list};
use crate::archival::{Instruction, exports_after_delete};

/// When and what the archival worker runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Minutes between two runs. Fractional values are allowed.
    /// Default: 1440 (once per day)
    #[serde(default = "default_interval_minutes", alias = "job_repeat_time")]
    pub interval_minutes: f64,

    /// Ordered steps to execute for every job: `delete`, `to_azure`, `to_db`.
    ///
    /// Steps run exactly in this order. Placing `delete` before an export
    /// means the export no longer sees the purged rows.
    #[serde(deserialize_with = "string_or_list")]
    #[cfg_attr(feature = "json-schema", schemars(with = "Vec<String>"))]
    pub instructions: Vec<Instruction>,

    /// UTC offset used to derive the reference time, e.g. `+05:30`.
    /// The cutoff is computed in this offset because source timestamps are
    /// stored without a zone.
    /// Default: `+00:00`
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

fn default_interval_minutes() -> f64 {
    1440.0
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.interval_minutes.is_finite() || self.interval_minutes <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "scheduler.interval_minutes must be a positive number, got {}",
                self.interval_minutes
            )));
        }

        if self.instructions.is_empty() {
            return Err(ConfigError::Validation(
                "scheduler.instructions cannot be empty".into(),
            ));
        }

        self.reference_offset()?;

        // Unknown steps are allowed through: the run executes everything
        // before them and aborts at their position.
        for (position, instruction) in self.instructions.iter().enumerate() {
            if instruction.is_unknown() {
                tracing::warn!(
                    position = position + 1,
                    instruction = %instruction,
                    "Unknown instruction configured; runs will abort when they reach it"
                );
            }
        }

        let lossy = exports_after_delete(&self.instructions);
        if !lossy.is_empty() {
            tracing::warn!(
                instructions = ?self.instructions.iter().map(Instruction::as_str).collect::<Vec<_>>(),
                "`delete` runs before {} export step(s); rows older than the cutoff will be \
                 purged before they are exported",
                lossy.len()
            );
        }

        Ok(())
    }

    /// Interval between two runs.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_minutes * 60.0)
    }

    /// Parsed UTC offset for reference time computation.
    pub fn reference_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset.parse::<FixedOffset>().map_err(|e| {
            ConfigError::Validation(format!(
                "scheduler.utc_offset '{}' is not a valid offset (expected e.g. +05:30): {e}",
                self.utc_offset
            ))
        })
    }

    pub fn has(&self, instruction: &Instruction) -> bool {
        self.instructions.contains(instruction)
    }
}
