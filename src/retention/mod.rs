//! Scheduled archival.
//!
//! The worker wakes on the configured interval and, on every tick:
//! 1. Re-reads the configuration file
//! 2. Runs every archival job against the current reference time
//! 3. Logs the run summary
//!
//! Runs never overlap: a tick that arrives while a run is in progress is
//! skipped.

mod worker;

pub use worker::{ArchivalWorker, WorkerError, start_archival_worker};
