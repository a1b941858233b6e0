//! Archival worker.
//!
//! Runs the configured archival jobs on a fixed interval. The config file is
//! re-read before every run, so edits take effect on the next tick without a
//! restart. A run always completes before the next one starts.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::NaiveDateTime;
use thiserror::Error;
use tokio::{
    sync::Mutex,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    archival::{ArchivalError, Archiver, RunReport, reference_now},
    config::{ArchivistConfig, ConfigError},
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Archival(#[from] ArchivalError),

    #[error("An archival run is already in progress")]
    AlreadyRunning,
}

pub struct ArchivalWorker {
    config_path: PathBuf,
    run_lock: Mutex<()>,
}

impl ArchivalWorker {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config file and execute one run at the current time.
    ///
    /// Returns [`WorkerError::AlreadyRunning`] if another run holds the lock.
    pub async fn run_once(&self) -> Result<RunReport, WorkerError> {
        let config = ArchivistConfig::from_file(&self.config_path)?;
        self.run_config(&config, None).await
    }

    /// Execute one run of `config`. `reference` defaults to the current time
    /// in the configured UTC offset.
    pub async fn run_config(
        &self,
        config: &ArchivistConfig,
        reference: Option<NaiveDateTime>,
    ) -> Result<RunReport, WorkerError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| WorkerError::AlreadyRunning)?;

        let reference = match reference {
            Some(reference) => reference,
            None => reference_now(config.scheduler.reference_offset()?),
        };
        let archiver = Archiver::from_config(config)?;
        Ok(archiver.run(&config.jobs, reference).await)
    }
}

/// Starts the archival worker loop.
///
/// The first run starts immediately. The loop runs until the task is
/// cancelled; failed runs are logged and retried on the next tick.
pub async fn start_archival_worker(worker: &ArchivalWorker) -> Result<(), WorkerError> {
    let config = ArchivistConfig::from_file(worker.config_path())?;
    let mut period = config.scheduler.interval();

    let dry_run_msg = if config.safety.dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        config = %worker.config_path().display(),
        interval_secs = period.as_secs(),
        instructions = ?config.scheduler.instructions,
        jobs = config.jobs.len(),
        dry_run = config.safety.dry_run,
        "Starting archival worker{}",
        dry_run_msg
    );

    let mut ticker = tick_schedule(Instant::now(), period);

    loop {
        ticker.tick().await;

        let config = match ArchivistConfig::from_file(worker.config_path()) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload configuration, skipping run");
                continue;
            }
        };

        match worker.run_config(&config, None).await {
            Ok(report) if report.is_success() => {
                tracing::debug!(jobs = report.jobs.len(), "Archival run succeeded");
            }
            Ok(report) => {
                tracing::warn!(
                    aborted = report.aborted_jobs(),
                    "Archival run completed with aborted jobs"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running archival");
            }
        }

        let configured = config.scheduler.interval();
        if configured != period {
            tracing::info!(
                previous_secs = period.as_secs(),
                interval_secs = configured.as_secs(),
                "Archival interval changed"
            );
            period = configured;
            ticker = tick_schedule(Instant::now() + period, period);
        }
    }
}

fn tick_schedule(start: Instant, period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use chrono::NaiveDate;
    use sqlx::{Connection, sqlite::SqliteConnectOptions, sqlite::SqliteConnection};
    use tempfile::TempDir;

    use super::*;
    use crate::archival::{JobStatus, TableOutcome};

    async fn setup(dir: &TempDir, instructions: &str) -> PathBuf {
        let db_path = dir.path().join("source.db");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        for sql in [
            "CREATE TABLE sensor_a (Date_time TEXT, reading REAL)",
            "INSERT INTO sensor_a VALUES ('2023-01-02 10:00:00', 20.5)",
            "INSERT INTO sensor_a VALUES ('2023-01-09 10:00:00', 21.5)",
        ] {
            sqlx::query(sql).execute(&mut conn).await.unwrap();
        }
        conn.close().await.unwrap();

        let config_path = dir.path().join("archivist.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
[scheduler]
interval_minutes = 60
instructions = "{instructions}"

[source]
type = "sqlite"
path = "{db}"

[blob]
type = "filesystem"
path = "{blobs}"
container_name = "archive"

[[jobs]]
table_names = "sensor_a"
backup_duration_days = 7
blob_names = "sensor_a.csv"
"#,
                db = db_path.display(),
                blobs = dir.path().join("blobs").display(),
            ),
        )
        .unwrap();
        config_path
    }

    fn reference() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_config_exports_and_deletes() {
        let dir = TempDir::new().unwrap();
        let path = setup(&dir, "to_azure, delete").await;
        let worker = ArchivalWorker::new(&path);
        let config = ArchivistConfig::from_file(&path).unwrap();

        let report = worker.run_config(&config, Some(reference())).await.unwrap();

        assert!(report.is_success());
        let job = &report.jobs[0];
        assert_eq!(job.cutoff.as_deref(), Some("2023-01-03 00:00:00"));
        assert!(matches!(job.steps[0].tables[0].outcome, TableOutcome::Uploaded { rows: 1, .. }));
        assert_eq!(job.steps[1].tables[0].outcome, TableOutcome::Deleted { rows: 1 });

        let csv = std::fs::read_to_string(dir.path().join("blobs/archive/sensor_a.csv")).unwrap();
        assert_eq!(csv, "Date_time,reading\n2023-01-02 10:00:00,20.5\n");
    }

    #[tokio::test]
    async fn test_run_once_reads_config_file() {
        let dir = TempDir::new().unwrap();
        let path = setup(&dir, "delete").await;
        let worker = ArchivalWorker::new(&path);

        // The reference is the current time, so both 2023 rows are old
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.jobs[0].status, JobStatus::Completed);
        assert_eq!(
            report.jobs[0].steps[0].tables[0].outcome,
            TableOutcome::Deleted { rows: 2 }
        );
    }

    #[tokio::test]
    async fn test_overlapping_run_rejected() {
        let dir = TempDir::new().unwrap();
        let path = setup(&dir, "delete").await;
        let worker = ArchivalWorker::new(&path);

        let _held = worker.run_lock.try_lock().unwrap();
        let err = worker.run_once().await.unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let worker = ArchivalWorker::new(dir.path().join("absent.toml"));
        let err = worker.run_once().await.unwrap_err();
        assert!(matches!(err, WorkerError::Config(ConfigError::Io(..))));
    }

    #[tokio::test]
    async fn test_worker_exits_on_invalid_initial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archivist.toml");
        std::fs::write(&path, "[scheduler]\ninstructions = \"delete\"\n").unwrap();

        let worker = ArchivalWorker::new(&path);
        let err = start_archival_worker(&worker).await.unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
    }
}
