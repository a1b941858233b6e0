//! Outcome reporting for archival runs.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Results from one scheduled run, covering every configured job.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Local reference time the job cutoffs were computed from.
    pub reference: NaiveDateTime,
    pub dry_run: bool,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    /// Whether every job ran to completion.
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|job| job.status == JobStatus::Completed)
    }

    pub fn aborted_jobs(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.status == JobStatus::Aborted)
            .count()
    }

    pub fn failed_tables(&self) -> usize {
        self.jobs.iter().map(JobReport::failed_tables).sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: String,
    /// `None` when the cutoff could not be computed.
    pub cutoff: Option<String>,
    pub status: JobStatus,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    pub fn failed_tables(&self) -> usize {
        self.steps
            .iter()
            .flat_map(|step| &step.tables)
            .filter(|table| matches!(table.outcome, TableOutcome::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub instruction: String,
    pub tables: Vec<TableReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    /// Blob name or destination table, for export steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub outcome: TableOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Deleted { rows: u64 },
    /// Dry run: the delete was logged and skipped.
    DeleteSkipped,
    /// An export of this table failed earlier in the job; nothing was deleted.
    Retained,
    Uploaded { rows: usize, bytes: usize, location: String },
    Appended { rows: u64 },
    /// Nothing older than the cutoff.
    Empty,
    Failed { error: String },
}
