//! Orchestration scenarios against in-memory stores and, where the
//! `database-sqlite` feature is enabled, real SQLite files.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use super::*;
use crate::{
    config::{JobConfig, SafetyConfig, TimeoutConfig},
    db::{BackupStore, DbError, DbResult, RowSet, SourceStore, StoreBackend, Value},
    sinks::{BlobAck, BlobSink, BlobSinkError, BlobSinkResult},
};

fn ts(d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

fn reference() -> NaiveDateTime {
    ts(10, 0)
}

fn instructions(names: &[&str]) -> Vec<Instruction> {
    names.iter().map(|n| Instruction::parse(n)).collect()
}

fn job(tables: &[&str]) -> JobConfig {
    JobConfig {
        name: None,
        table_names: tables.iter().map(|t| t.to_string()).collect(),
        backup_duration_days: 7.0,
        backup_table_names: tables.iter().map(|t| format!("{t}_archive")).collect(),
        blob_names: tables.iter().map(|t| format!("{t}.csv")).collect(),
        timestamp_column: "Date_time".into(),
    }
}

/// In-memory source holding `(Date_time, reading)` rows per table.
#[derive(Default)]
struct MemorySource {
    tables: Mutex<HashMap<String, Vec<(NaiveDateTime, f64)>>>,
    reads: AtomicUsize,
    cutoffs: Mutex<Vec<NaiveDateTime>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl MemorySource {
    fn with_table(self, table: &str, rows: &[(NaiveDateTime, f64)]) -> Self {
        self.tables
            .lock()
            .unwrap()
            .insert(table.to_string(), rows.to_vec());
        self
    }

    fn failing_on(mut self, table: &str) -> Self {
        self.failing.insert(table.to_string());
        self
    }

    fn remaining(&self, table: &str) -> usize {
        self.tables.lock().unwrap()[table].len()
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Cutoffs passed to every select and delete, in call order.
    fn cutoffs(&self) -> Vec<NaiveDateTime> {
        self.cutoffs.lock().unwrap().clone()
    }

    fn check(&self, table: &str) -> DbResult<()> {
        if self.failing.contains(table) {
            return Err(DbError::InvalidIdentifier(format!("{table} is offline")));
        }
        Ok(())
    }
}

impl StoreBackend for MemorySource {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn select_older_than(
        &self,
        table: &str,
        _column: &str,
        cutoff: &Cutoff,
    ) -> DbResult<RowSet> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.cutoffs.lock().unwrap().push(cutoff.timestamp());
        self.check(table)?;

        let tables = self.tables.lock().unwrap();
        let rows = tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|(at, _)| *at < cutoff.timestamp())
            .map(|(at, reading)| vec![Value::Timestamp(*at), Value::Float(*reading)])
            .collect();
        Ok(RowSet::new(
            vec!["Date_time".into(), "reading".into()],
            rows,
        ))
    }

    async fn delete_older_than(
        &self,
        table: &str,
        _column: &str,
        cutoff: &Cutoff,
    ) -> DbResult<u64> {
        self.cutoffs.lock().unwrap().push(cutoff.timestamp());
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|(at, _)| *at >= cutoff.timestamp());
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
struct MemoryBackup {
    appended: Mutex<Vec<(String, RowSet)>>,
    failing: HashSet<String>,
}

impl MemoryBackup {
    fn failing_on(table: &str) -> Self {
        Self {
            failing: [table.to_string()].into(),
            ..Default::default()
        }
    }

    fn appended(&self) -> Vec<(String, RowSet)> {
        self.appended.lock().unwrap().clone()
    }
}

impl StoreBackend for MemoryBackup {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl BackupStore for MemoryBackup {
    async fn append(&self, table: &str, rows: &RowSet) -> DbResult<u64> {
        if self.failing.contains(table) {
            return Err(DbError::InvalidIdentifier(table.to_string()));
        }
        self.appended
            .lock()
            .unwrap()
            .push((table.to_string(), rows.clone()));
        Ok(rows.len() as u64)
    }
}

#[derive(Default)]
struct MemorySink {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
    failing: HashSet<String>,
}

impl MemorySink {
    fn failing_on(object: &str) -> Self {
        Self {
            failing: [object.to_string()].into(),
            ..Default::default()
        }
    }

    fn names(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl BlobSink for MemorySink {
    async fn upload(&self, object_name: &str, content: Vec<u8>) -> BlobSinkResult<BlobAck> {
        if self.failing.contains(object_name) {
            return Err(BlobSinkError::Rejected {
                object: object_name.to_string(),
                status: 503,
                body: "ServerBusy".into(),
            });
        }
        let bytes = content.len();
        self.objects
            .lock()
            .unwrap()
            .push((object_name.to_string(), content));
        Ok(BlobAck {
            location: format!("memory://{object_name}"),
            bytes,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn sensor_source() -> MemorySource {
    MemorySource::default()
        .with_table("sensor_a", &[(ts(2, 10), 20.5), (ts(2, 11), 21.0), (ts(9, 0), 22.0)])
        .with_table("sensor_b", &[(ts(1, 0), 1.0), (ts(8, 0), 2.0)])
}

fn outcomes(report: &JobReport, step: usize) -> Vec<&TableOutcome> {
    report.steps[step]
        .tables
        .iter()
        .map(|t| &t.outcome)
        .collect()
}

#[tokio::test]
async fn test_exports_share_one_source_read() {
    let source = Arc::new(sensor_source());
    let backup = Arc::new(MemoryBackup::default());
    let sink = Arc::new(MemorySink::default());

    let archiver = Archiver::new(source.clone(), instructions(&["to_azure", "to_db"]))
        .with_backup(backup.clone())
        .with_sink(sink.clone());
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.cutoff.as_deref(), Some("2023-01-03 00:00:00"));
    assert_eq!(source.reads(), 1);

    let appended = backup.appended();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].0, "sensor_a_archive");
    assert_eq!(appended[0].1.len(), 2);

    let objects = sink.objects.lock().unwrap();
    let csv = String::from_utf8(objects[0].1.clone()).unwrap();
    assert_eq!(
        csv,
        "Date_time,reading\n2023-01-02 10:00:00,20.5\n2023-01-02 11:00:00,21\n"
    );
}

#[tokio::test]
async fn test_to_db_then_delete_archives_before_removing() {
    let source = Arc::new(sensor_source());
    let backup = Arc::new(MemoryBackup::default());

    let archiver = Archiver::new(source.clone(), instructions(&["to_db", "delete"]))
        .with_backup(backup.clone());
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(backup.appended()[0].1.len(), 2);
    assert_eq!(source.remaining("sensor_a"), 1);
    assert_eq!(outcomes(&report, 1), vec![&TableOutcome::Deleted { rows: 2 }]);
}

#[tokio::test]
async fn test_delete_then_to_db_exports_nothing() {
    let source = Arc::new(sensor_source());
    let backup = Arc::new(MemoryBackup::default());

    let archiver = Archiver::new(source.clone(), instructions(&["delete", "to_db"]))
        .with_backup(backup.clone());
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert!(backup.appended().is_empty());
    assert_eq!(outcomes(&report, 1), vec![&TableOutcome::Empty]);
}

#[tokio::test]
async fn test_to_db_failure_aborts_remaining_steps() {
    let source = Arc::new(sensor_source());
    let backup = Arc::new(MemoryBackup::failing_on("sensor_a_archive"));

    let archiver = Archiver::new(source.clone(), instructions(&["to_db", "delete"]))
        .with_backup(backup.clone());
    let report = archiver
        .run_job(&job(&["sensor_a", "sensor_b"]), reference())
        .await;

    assert_eq!(report.status, JobStatus::Aborted);
    assert!(report.error.as_deref().unwrap().contains("Append failed"));
    // sensor_b was never appended and nothing was deleted
    assert!(backup.appended().is_empty());
    assert_eq!(source.remaining("sensor_a"), 3);
    assert_eq!(source.remaining("sensor_b"), 2);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].tables.len(), 1);
}

#[tokio::test]
async fn test_to_db_read_failure_aborts() {
    let source = Arc::new(sensor_source().failing_on("sensor_a"));
    let backup = Arc::new(MemoryBackup::default());

    let archiver =
        Archiver::new(source.clone(), instructions(&["to_db"])).with_backup(backup.clone());
    let report = archiver
        .run_job(&job(&["sensor_a", "sensor_b"]), reference())
        .await;

    assert_eq!(report.status, JobStatus::Aborted);
    assert!(backup.appended().is_empty());
}

#[tokio::test]
async fn test_to_azure_failure_skips_table_and_continues() {
    let source = Arc::new(sensor_source());
    let sink = Arc::new(MemorySink::failing_on("sensor_a.csv"));

    let archiver = Archiver::new(source.clone(), instructions(&["to_azure", "delete"]))
        .with_sink(sink.clone());
    let report = archiver
        .run_job(&job(&["sensor_a", "sensor_b"]), reference())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(sink.names(), vec!["sensor_b.csv"]);
    assert!(matches!(
        outcomes(&report, 0)[0],
        TableOutcome::Failed { error } if error.contains("503")
    ));
    assert_eq!(report.failed_tables(), 1);
    // sensor_a was never exported, so its rows stay; sensor_b is purged
    assert_eq!(
        outcomes(&report, 1),
        vec![&TableOutcome::Retained, &TableOutcome::Deleted { rows: 1 }]
    );
    assert_eq!(source.remaining("sensor_a"), 3);
    assert_eq!(source.remaining("sensor_b"), 1);
}

#[tokio::test]
async fn test_delete_keeps_table_when_any_earlier_export_failed() {
    let source = Arc::new(sensor_source());
    let sink = Arc::new(MemorySink::failing_on("sensor_b.csv"));
    let backup = Arc::new(MemoryBackup::default());

    let archiver = Archiver::new(
        source.clone(),
        instructions(&["to_azure", "to_db", "delete"]),
    )
    .with_sink(sink.clone())
    .with_backup(backup.clone());
    let report = archiver
        .run_job(&job(&["sensor_a", "sensor_b"]), reference())
        .await;

    // to_db succeeded for sensor_b, but its blob export did not
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(backup.appended().len(), 2);
    assert_eq!(
        outcomes(&report, 2),
        vec![&TableOutcome::Deleted { rows: 2 }, &TableOutcome::Retained]
    );
    assert_eq!(source.remaining("sensor_a"), 1);
    assert_eq!(source.remaining("sensor_b"), 2);
}

#[tokio::test]
async fn test_delete_before_failed_export_still_deletes() {
    let source = Arc::new(sensor_source());
    let sink = Arc::new(MemorySink::failing_on("sensor_a.csv"));

    let archiver = Archiver::new(source.clone(), instructions(&["delete", "to_azure"]))
        .with_sink(sink.clone());
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    // configured order is honored even though the rows are lost
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(outcomes(&report, 0), vec![&TableOutcome::Deleted { rows: 2 }]);
    assert_eq!(outcomes(&report, 1), vec![&TableOutcome::Empty]);
    assert!(sink.names().is_empty());
}

#[tokio::test]
async fn test_every_source_call_uses_the_job_cutoff() {
    let source = Arc::new(sensor_source());
    let sink = Arc::new(MemorySink::default());
    let backup = Arc::new(MemoryBackup::default());

    let archiver = Archiver::new(
        source.clone(),
        instructions(&["to_azure", "delete", "to_db"]),
    )
    .with_sink(sink.clone())
    .with_backup(backup.clone());
    let report = archiver
        .run_job(&job(&["sensor_a", "sensor_b"]), reference())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    // two reads shared by both exports, then two deletes
    assert_eq!(source.cutoffs(), vec![ts(3, 0); 4]);
}

#[tokio::test]
async fn test_each_job_gets_its_own_cutoff() {
    let source = Arc::new(sensor_source());
    let mut short = job(&["sensor_b"]);
    short.backup_duration_days = 2.0;

    let report = Archiver::new(source.clone(), instructions(&["delete"]))
        .run(&[job(&["sensor_a"]), short], reference())
        .await;

    assert!(report.is_success());
    assert_eq!(source.cutoffs(), vec![ts(3, 0), ts(8, 0)]);
    assert_eq!(report.jobs[1].cutoff.as_deref(), Some("2023-01-08 00:00:00"));
}

#[tokio::test]
async fn test_to_azure_read_failure_is_retried_by_later_step() {
    let source = Arc::new(sensor_source().failing_on("sensor_b"));
    let sink = Arc::new(MemorySink::default());
    let backup = Arc::new(MemoryBackup::default());

    let archiver = Archiver::new(source.clone(), instructions(&["to_azure", "to_db"]))
        .with_sink(sink.clone())
        .with_backup(backup.clone());
    let report = archiver
        .run_job(&job(&["sensor_a", "sensor_b"]), reference())
        .await;

    // to_azure skipped sensor_b; to_db re-read it, failed again, and aborted
    assert_eq!(sink.names(), vec!["sensor_a.csv"]);
    assert_eq!(report.status, JobStatus::Aborted);
    assert_eq!(source.reads(), 3);
    assert_eq!(backup.appended().len(), 1);
}

#[tokio::test]
async fn test_unknown_instruction_aborts_before_running() {
    let source = Arc::new(sensor_source());
    let sink = Arc::new(MemorySink::default());

    let archiver = Archiver::new(
        source.clone(),
        instructions(&["to_azure", "archive_all", "delete"]),
    )
    .with_sink(sink.clone());
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Aborted);
    assert!(report.error.as_deref().unwrap().contains("archive_all"));
    // the earlier upload stands; the later delete never ran
    assert_eq!(sink.names(), vec!["sensor_a.csv"]);
    assert_eq!(source.remaining("sensor_a"), 3);
}

#[tokio::test]
async fn test_empty_snapshot_skips_exports() {
    let source = Arc::new(MemorySource::default().with_table("sensor_a", &[(ts(9, 0), 1.0)]));
    let sink = Arc::new(MemorySink::default());
    let backup = Arc::new(MemoryBackup::default());

    let archiver = Archiver::new(source.clone(), instructions(&["to_azure", "to_db"]))
        .with_sink(sink.clone())
        .with_backup(backup.clone());
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert!(sink.names().is_empty());
    assert!(backup.appended().is_empty());
    assert_eq!(source.reads(), 1);
    assert_eq!(outcomes(&report, 0), vec![&TableOutcome::Empty]);
    assert_eq!(outcomes(&report, 1), vec![&TableOutcome::Empty]);
}

#[tokio::test]
async fn test_delete_failure_skips_table() {
    let source = Arc::new(sensor_source().failing_on("sensor_a"));

    let archiver = Archiver::new(source.clone(), instructions(&["delete"]));
    let report = archiver
        .run_job(&job(&["sensor_a", "sensor_b"]), reference())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert!(matches!(outcomes(&report, 0)[0], TableOutcome::Failed { .. }));
    assert_eq!(outcomes(&report, 0)[1], &TableOutcome::Deleted { rows: 1 });
}

#[tokio::test]
async fn test_dry_run_skips_delete() {
    let source = Arc::new(sensor_source());

    let archiver = Archiver::new(source.clone(), instructions(&["delete"]))
        .with_safety(SafetyConfig { dry_run: true });
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(outcomes(&report, 0), vec![&TableOutcome::DeleteSkipped]);
    assert_eq!(source.remaining("sensor_a"), 3);
}

#[tokio::test]
async fn test_missing_sink_aborts() {
    let source = Arc::new(sensor_source());

    let archiver = Archiver::new(source.clone(), instructions(&["to_azure"]));
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Aborted);
    assert!(report.error.as_deref().unwrap().contains("[blob]"));
    assert_eq!(source.reads(), 0);
}

#[tokio::test]
async fn test_invalid_duration_aborts_without_cutoff() {
    let source = Arc::new(sensor_source());
    let mut config = job(&["sensor_a"]);
    config.backup_duration_days = -1.0;

    let report = Archiver::new(source.clone(), instructions(&["delete"]))
        .run_job(&config, reference())
        .await;

    assert_eq!(report.status, JobStatus::Aborted);
    assert!(report.cutoff.is_none());
    assert_eq!(source.remaining("sensor_a"), 3);
}

#[tokio::test]
async fn test_slow_source_times_out() {
    let source = Arc::new(MemorySource {
        delay: Some(Duration::from_secs(5)),
        ..sensor_source()
    });
    let sink = Arc::new(MemorySink::default());

    let archiver = Archiver::new(source.clone(), instructions(&["to_azure"]))
        .with_sink(sink.clone())
        .with_timeouts(TimeoutConfig {
            query_secs: 1,
            ..Default::default()
        });
    let report = archiver.run_job(&job(&["sensor_a"]), reference()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert!(matches!(
        outcomes(&report, 0)[0],
        TableOutcome::Failed { error } if error.contains("timed out")
    ));
    assert!(sink.names().is_empty());
}

#[tokio::test]
async fn test_run_covers_every_job() {
    let source = Arc::new(sensor_source());
    let backup = Arc::new(MemoryBackup::failing_on("sensor_a_archive"));

    let archiver =
        Archiver::new(source.clone(), instructions(&["to_db"])).with_backup(backup.clone());
    let report = archiver
        .run(&[job(&["sensor_a"]), job(&["sensor_b"])], reference())
        .await;

    assert_eq!(report.jobs.len(), 2);
    assert_eq!(report.jobs[0].status, JobStatus::Aborted);
    assert_eq!(report.jobs[1].status, JobStatus::Completed);
    assert!(!report.is_success());
    assert_eq!(report.aborted_jobs(), 1);
    assert_eq!(backup.appended()[0].0, "sensor_b_archive");
}

#[cfg(feature = "database-sqlite")]
mod sqlite {
    use sqlx::{Connection, sqlite::SqliteConnectOptions, sqlite::SqliteConnection};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::{FilesystemBlobConfig, SqliteStoreConfig},
        db::sqlite::SqliteStore,
        sinks::FilesystemBlobSink,
    };

    const SCHEMA: &str = "CREATE TABLE {t} (Date_time TEXT, reading REAL)";

    async fn database(dir: &TempDir, name: &str, sql: &[String]) -> SqliteStore {
        let path = dir.path().join(name);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        for statement in sql {
            sqlx::query(statement).execute(&mut conn).await.unwrap();
        }
        conn.close().await.unwrap();

        SqliteStore::new(SqliteStoreConfig {
            path: path.to_string_lossy().into_owned(),
            busy_timeout_ms: 1000,
        })
    }

    async fn plant(dir: &TempDir) -> (Arc<SqliteStore>, Arc<SqliteStore>) {
        let source = database(
            dir,
            "source.db",
            &[
                SCHEMA.replace("{t}", "sensor_a"),
                "INSERT INTO sensor_a VALUES ('2023-01-02 10:00:00', 20.5)".into(),
                "INSERT INTO sensor_a VALUES ('2023-01-02 11:00:00', 21.5)".into(),
                "INSERT INTO sensor_a VALUES ('2023-01-09 08:00:00', 22.0)".into(),
            ],
        )
        .await;
        let backup = database(dir, "backup.db", &[SCHEMA.replace("{t}", "sensor_a_archive")]).await;
        (Arc::new(source), Arc::new(backup))
    }

    async fn count(store: &SqliteStore, table: &str) -> usize {
        let far_future = Cutoff::at(ts(31, 0));
        store
            .select_older_than(table, "Date_time", &far_future)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_to_db_then_delete_on_sqlite() {
        let dir = TempDir::new().unwrap();
        let (source, backup) = plant(&dir).await;

        let report = Archiver::new(source.clone(), instructions(&["to_db", "delete"]))
            .with_backup(backup.clone())
            .run_job(&job(&["sensor_a"]), reference())
            .await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.cutoff.as_deref(), Some("2023-01-03 00:00:00"));

        let archived = backup
            .select_older_than("sensor_a_archive", "Date_time", &Cutoff::at(ts(31, 0)))
            .await
            .unwrap();
        assert_eq!(archived.len(), 2);
        assert_eq!(archived.rows[0][0], Value::Text("2023-01-02 10:00:00".into()));
        assert_eq!(count(&source, "sensor_a").await, 1);
    }

    #[tokio::test]
    async fn test_delete_then_to_db_on_sqlite() {
        let dir = TempDir::new().unwrap();
        let (source, backup) = plant(&dir).await;

        let report = Archiver::new(source.clone(), instructions(&["delete", "to_db"]))
            .with_backup(backup.clone())
            .run_job(&job(&["sensor_a"]), reference())
            .await;

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(count(&source, "sensor_a").await, 1);
        assert_eq!(count(&backup, "sensor_a_archive").await, 0);
    }

    #[tokio::test]
    async fn test_missing_destination_table_aborts_on_sqlite() {
        let dir = TempDir::new().unwrap();
        let (source, backup) = plant(&dir).await;
        let mut config = job(&["sensor_a"]);
        config.backup_table_names = vec!["sensor_a_missing".into()];

        let report = Archiver::new(source.clone(), instructions(&["to_db", "delete"]))
            .with_backup(backup)
            .run_job(&config, reference())
            .await;

        assert_eq!(report.status, JobStatus::Aborted);
        assert_eq!(count(&source, "sensor_a").await, 3);
    }

    #[tokio::test]
    async fn test_rejected_upload_keeps_rows_across_runs() {
        let dir = TempDir::new().unwrap();
        let (source, _) = plant(&dir).await;
        let sink = Arc::new(FilesystemBlobSink::new(FilesystemBlobConfig {
            path: dir.path().join("blobs").to_string_lossy().into_owned(),
            container_name: "archive".into(),
            create_dir: true,
            overwrite: false,
        }));
        let archiver = Archiver::new(source.clone(), instructions(&["to_azure", "delete"]))
            .with_sink(sink);
        let blob = dir.path().join("blobs/archive/sensor_a.csv");
        let exported = "Date_time,reading\n2023-01-02 10:00:00,20.5\n2023-01-02 11:00:00,21.5\n";

        let first = archiver.run_job(&job(&["sensor_a"]), reference()).await;
        assert_eq!(first.steps[1].tables[0].outcome, TableOutcome::Deleted { rows: 2 });
        assert_eq!(std::fs::read_to_string(&blob).unwrap(), exported);

        // A new row ages past the next cutoff, but the object name is taken
        let late = RowSet::new(
            vec!["Date_time".into(), "reading".into()],
            vec![vec![Value::Text("2023-01-04 12:00:00".into()), Value::Float(23.0)]],
        );
        source.append("sensor_a", &late).await.unwrap();

        let second = archiver.run_job(&job(&["sensor_a"]), ts(12, 0)).await;
        assert_eq!(second.status, JobStatus::Completed);
        assert!(matches!(
            &second.steps[0].tables[0].outcome,
            TableOutcome::Failed { error } if error.contains("already exists")
        ));
        assert_eq!(second.steps[1].tables[0].outcome, TableOutcome::Retained);

        assert_eq!(std::fs::read_to_string(&blob).unwrap(), exported);
        assert_eq!(count(&source, "sensor_a").await, 2);
    }
}
