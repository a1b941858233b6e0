//! Archival of aged rows.
//!
//! Each scheduled run processes every configured job:
//! 1. Compute the job cutoff from the run's reference time
//! 2. Execute the instruction list in order (`delete`, `to_azure`, `to_db`)
//! 3. Report per-table outcomes
//!
//! Source reads are cached per job so that several exports of one table
//! see identical rows.

mod cutoff;
mod instruction;
mod job;
mod report;
mod snapshot;
#[cfg(test)]
mod tests;

pub use cutoff::{CUTOFF_FORMAT, Cutoff, CutoffError, reference_at, reference_now};
pub use instruction::{Instruction, exports_after_delete};
pub use job::{ArchivalError, ArchivalResult, Archiver, JobState};
pub use report::{JobReport, JobStatus, RunReport, StepReport, TableOutcome, TableReport};
pub use snapshot::{Snapshot, SnapshotCache};
