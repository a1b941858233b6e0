//! Scheduled data-retention pipeline.
//!
//! On every tick, each configured job computes a cutoff from the run's
//! reference time and applies an ordered instruction list (`delete`,
//! `to_azure`, `to_db`) to rows older than that cutoff.

pub mod archival;
pub mod config;
pub mod db;
#[cfg(feature = "cli")]
pub mod observability;
pub mod retention;
pub mod sinks;
