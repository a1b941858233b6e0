//! Archival orchestration.
//!
//! An [`Archiver`] runs the configured instruction list once per job. Each
//! job computes its cutoff once from the run's reference time and keeps its
//! own [`SnapshotCache`], so a table exported by several steps is read from
//! the source only once.
//!
//! Failure handling differs per instruction:
//!
//! - `delete`: a failed table is logged and skipped. A table whose export
//!   failed earlier in the job is kept, so rows are only removed once every
//!   preceding export of that table succeeded
//! - `to_azure`: a failed read or upload is logged and the table skipped
//! - `to_db`: any failure aborts the job
//! - an unrecognized instruction aborts the job before it runs
//!
//! Effects of steps that already ran are never rolled back.

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use chrono::{NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{
    Cutoff, Instruction, JobReport, JobStatus, RunReport, Snapshot, SnapshotCache, StepReport,
    TableOutcome, TableReport,
};
use crate::{
    config::{ArchivistConfig, ConfigError, JobConfig, SafetyConfig, TimeoutConfig},
    db::{self, BackupStore, DbError, SourceStore},
    sinks::{self, BlobSink, BlobSinkError},
};

#[derive(Debug, Error)]
pub enum ArchivalError {
    #[error("Store unavailable: {0}")]
    Connection(#[source] DbError),

    #[error("Query failed: {0}")]
    Query(#[source] DbError),

    #[error("Upload failed: {0}")]
    Upload(#[from] BlobSinkError),

    #[error("Append failed: {0}")]
    Write(#[source] DbError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown instruction '{0}'")]
    UnknownInstruction(String),

    #[error("{operation} on {table} timed out after {}s", limit.as_secs())]
    Timeout {
        operation: &'static str,
        table: String,
        limit: Duration,
    },
}

impl ArchivalError {
    fn from_read(e: DbError) -> Self {
        match e {
            DbError::Connection { .. } => ArchivalError::Connection(e),
            _ => ArchivalError::Query(e),
        }
    }

    fn from_write(e: DbError) -> Self {
        match e {
            DbError::Connection { .. } => ArchivalError::Connection(e),
            _ => ArchivalError::Write(e),
        }
    }
}

pub type ArchivalResult<T> = Result<T, ArchivalError>;

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running { step: usize, of: usize },
    Completed,
    Aborted,
}

/// Runs instruction lists against a source store and its export targets.
pub struct Archiver {
    source: Arc<dyn SourceStore>,
    backup: Option<Arc<dyn BackupStore>>,
    sink: Option<Arc<dyn BlobSink>>,
    instructions: Vec<Instruction>,
    safety: SafetyConfig,
    timeouts: TimeoutConfig,
}

impl Archiver {
    pub fn new(source: Arc<dyn SourceStore>, instructions: Vec<Instruction>) -> Self {
        Self {
            source,
            backup: None,
            sink: None,
            instructions,
            safety: SafetyConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Build the stores and sink described by `config`. No connection is
    /// opened until a step needs one.
    pub fn from_config(config: &ArchivistConfig) -> ArchivalResult<Self> {
        let sink = config
            .blob
            .as_ref()
            .map(sinks::create_blob_sink)
            .transpose()
            .map_err(|e| ConfigError::Validation(format!("blob: {e}")))?;

        let mut archiver = Self::new(
            db::source_store(&config.source),
            config.scheduler.instructions.clone(),
        )
        .with_safety(config.safety.clone())
        .with_timeouts(config.timeouts.clone());
        archiver.backup = config.backup_db.as_ref().map(db::backup_store);
        archiver.sink = sink;
        Ok(archiver)
    }

    pub fn with_backup(mut self, backup: Arc<dyn BackupStore>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn BlobSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_safety(mut self, safety: SafetyConfig) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Run every job in order against the same reference time.
    ///
    /// An aborted job does not prevent later jobs from running.
    pub async fn run(&self, jobs: &[JobConfig], reference: NaiveDateTime) -> RunReport {
        let started_at = Utc::now();
        info!(
            jobs = jobs.len(),
            reference = %reference,
            source = self.source.backend_name(),
            dry_run = self.safety.dry_run,
            "Starting archival run"
        );

        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            reports.push(self.run_job(job, reference).await);
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            reference,
            dry_run: self.safety.dry_run,
            jobs: reports,
        };

        if report.is_success() {
            info!(
                jobs = report.jobs.len(),
                failed_tables = report.failed_tables(),
                "Archival run complete"
            );
        } else {
            warn!(
                jobs = report.jobs.len(),
                aborted = report.aborted_jobs(),
                failed_tables = report.failed_tables(),
                "Archival run finished with aborted jobs"
            );
        }
        report
    }

    /// Run the instruction list for one job.
    pub async fn run_job(&self, config: &JobConfig, reference: NaiveDateTime) -> JobReport {
        let name = config.display_name();

        let cutoff = match Cutoff::from_reference(reference, config.backup_duration_days) {
            Ok(cutoff) => cutoff,
            Err(e) => {
                error!(job = %name, error = %e, "Cannot compute cutoff, aborting job");
                return JobReport {
                    job: name,
                    cutoff: None,
                    status: JobStatus::Aborted,
                    steps: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mut job = ArchivalJob::new(config, cutoff);
        let total = self.instructions.len();
        info!(job = %name, cutoff = %cutoff, steps = total, "Starting archival job");

        for (index, instruction) in self.instructions.iter().enumerate() {
            job.state = JobState::Running {
                step: index + 1,
                of: total,
            };
            debug!(job = %name, state = ?job.state, instruction = %instruction, "Running step");

            let mut step = StepReport {
                instruction: instruction.to_string(),
                tables: Vec::new(),
            };

            let result = match instruction {
                Instruction::Delete => self.delete(&job, &mut step).await,
                Instruction::ToAzure => self.export_to_blob(&mut job, &mut step).await,
                Instruction::ToDb => self.export_to_backup(&mut job, &mut step).await,
                Instruction::Unknown(raw) => Err(ArchivalError::UnknownInstruction(raw.clone())),
            };

            if !step.tables.is_empty() {
                job.steps.push(step);
            }

            if let Err(e) = result {
                error!(
                    job = %name,
                    step = index + 1,
                    instruction = %instruction,
                    error = %e,
                    "Aborting archival job"
                );
                job.state = JobState::Aborted;
                return job.into_report(name, Some(e.to_string()));
            }
        }

        job.state = JobState::Completed;
        info!(job = %name, failed_tables = job.failed_tables(), "Archival job complete");
        job.into_report(name, None)
    }

    async fn delete(&self, job: &ArchivalJob<'_>, step: &mut StepReport) -> ArchivalResult<()> {
        let config = job.config;

        for table in &config.table_names {
            let outcome = if job.unexported.contains(table) {
                warn!(
                    table = %table,
                    cutoff = %job.cutoff,
                    "Export of this table failed earlier in the job, keeping its rows"
                );
                TableOutcome::Retained
            } else if self.safety.dry_run {
                info!(
                    table = %table,
                    cutoff = %job.cutoff,
                    "DRY RUN: Would delete rows older than {}",
                    job.cutoff
                );
                TableOutcome::DeleteSkipped
            } else {
                let deleted = timed(
                    self.timeouts.delete(),
                    "delete",
                    table,
                    self.source
                        .delete_older_than(table, &config.timestamp_column, &job.cutoff),
                    ArchivalError::from_read,
                )
                .await;

                match deleted {
                    Ok(rows) => {
                        info!(table = %table, rows, cutoff = %job.cutoff, "Deleted archived rows");
                        TableOutcome::Deleted { rows }
                    }
                    Err(e) => {
                        warn!(table = %table, error = %e, "Delete failed, skipping table");
                        TableOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

            step.tables.push(TableReport {
                table: table.clone(),
                target: None,
                outcome,
            });
        }
        Ok(())
    }

    async fn export_to_blob(
        &self,
        job: &mut ArchivalJob<'_>,
        step: &mut StepReport,
    ) -> ArchivalResult<()> {
        let sink = self.sink.as_ref().ok_or_else(|| {
            ConfigError::Validation("to_azure requires a [blob] section".into())
        })?;
        let config = job.config;

        for (table, blob_name) in config.table_names.iter().zip(&config.blob_names) {
            let outcome = match self.upload_table(job, sink.as_ref(), table, blob_name).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        table = %table,
                        blob = %blob_name,
                        error = %e,
                        "Blob export failed, skipping table"
                    );
                    job.unexported.insert(table.clone());
                    TableOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            step.tables.push(TableReport {
                table: table.clone(),
                target: Some(blob_name.clone()),
                outcome,
            });
        }
        Ok(())
    }

    async fn upload_table(
        &self,
        job: &mut ArchivalJob<'_>,
        sink: &dyn BlobSink,
        table: &str,
        blob_name: &str,
    ) -> ArchivalResult<TableOutcome> {
        let Some(snapshot) = self.snapshot(job, table).await? else {
            info!(table, "Nothing older than cutoff, skipping blob export");
            return Ok(TableOutcome::Empty);
        };

        let ack = timed(
            self.timeouts.upload(),
            "upload",
            table,
            sinks::upload_snapshot(sink, blob_name, &snapshot),
            ArchivalError::Upload,
        )
        .await?;

        info!(
            table,
            rows = snapshot.len(),
            bytes = ack.bytes,
            location = %ack.location,
            "Exported snapshot to blob"
        );
        Ok(TableOutcome::Uploaded {
            rows: snapshot.len(),
            bytes: ack.bytes,
            location: ack.location,
        })
    }

    async fn export_to_backup(
        &self,
        job: &mut ArchivalJob<'_>,
        step: &mut StepReport,
    ) -> ArchivalResult<()> {
        let backup = self.backup.as_ref().ok_or_else(|| {
            ConfigError::Validation("to_db requires a [backup_db] section".into())
        })?;
        let config = job.config;

        for (table, destination) in config.table_names.iter().zip(&config.backup_table_names) {
            let result = self
                .append_table(job, backup.as_ref(), table, destination)
                .await;

            let (outcome, failure) = match result {
                Ok(outcome) => (outcome, None),
                Err(e) => (
                    TableOutcome::Failed {
                        error: e.to_string(),
                    },
                    Some(e),
                ),
            };
            step.tables.push(TableReport {
                table: table.clone(),
                target: Some(destination.clone()),
                outcome,
            });

            if let Some(e) = failure {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn append_table(
        &self,
        job: &mut ArchivalJob<'_>,
        backup: &dyn BackupStore,
        table: &str,
        destination: &str,
    ) -> ArchivalResult<TableOutcome> {
        let Some(snapshot) = self.snapshot(job, table).await? else {
            info!(table, "Nothing older than cutoff, skipping backup append");
            return Ok(TableOutcome::Empty);
        };

        let rows = timed(
            self.timeouts.append(),
            "append",
            table,
            backup.append(destination, &snapshot),
            ArchivalError::from_write,
        )
        .await?;

        info!(
            table,
            destination,
            rows,
            backend = backup.backend_name(),
            "Appended snapshot to backup store"
        );
        Ok(TableOutcome::Appended { rows })
    }

    /// Rows of `table` older than the job cutoff, read at most once per job.
    async fn snapshot(
        &self,
        job: &mut ArchivalJob<'_>,
        table: &str,
    ) -> ArchivalResult<Option<Snapshot>> {
        let column = job.config.timestamp_column.as_str();
        let cutoff = &job.cutoff;
        let source = self.source.as_ref();
        let limit = self.timeouts.query();

        job.cache
            .get_or_fetch(table, || {
                timed(
                    limit,
                    "select",
                    table,
                    source.select_older_than(table, column, cutoff),
                    ArchivalError::from_read,
                )
            })
            .await
    }
}

/// Mutable state of one job while its instructions run.
struct ArchivalJob<'a> {
    config: &'a JobConfig,
    cutoff: Cutoff,
    cache: SnapshotCache,
    /// Tables with a failed export step; later deletes leave them alone.
    unexported: HashSet<String>,
    state: JobState,
    steps: Vec<StepReport>,
}

impl<'a> ArchivalJob<'a> {
    fn new(config: &'a JobConfig, cutoff: Cutoff) -> Self {
        Self {
            config,
            cutoff,
            cache: SnapshotCache::new(),
            unexported: HashSet::new(),
            state: JobState::Idle,
            steps: Vec::new(),
        }
    }

    fn failed_tables(&self) -> usize {
        self.steps
            .iter()
            .flat_map(|step| &step.tables)
            .filter(|table| matches!(table.outcome, TableOutcome::Failed { .. }))
            .count()
    }

    fn into_report(self, name: String, error: Option<String>) -> JobReport {
        let status = match self.state {
            JobState::Completed => JobStatus::Completed,
            _ => JobStatus::Aborted,
        };
        JobReport {
            job: name,
            cutoff: Some(self.cutoff.formatted()),
            status,
            steps: self.steps,
            error,
        }
    }
}

/// Await `fut` for at most `limit`, converting its error with `map_err`.
async fn timed<T, E, F>(
    limit: Duration,
    operation: &'static str,
    table: &str,
    fut: F,
    map_err: impl FnOnce(E) -> ArchivalError,
) -> ArchivalResult<T>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(map_err),
        Err(_) => Err(ArchivalError::Timeout {
            operation,
            table: table.to_string(),
            limit,
        }),
    }
}
