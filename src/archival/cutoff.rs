use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Timelike, Utc};

/// Format used for the cutoff when bound as text and in logs.
pub const CUTOFF_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CutoffError {
    #[error("backup duration must be a non-negative number of days, got {0}")]
    InvalidDuration(f64),

    #[error("backup duration of {days} days before {reference} is out of range")]
    OutOfRange { days: f64, reference: NaiveDateTime },
}

/// Timestamp boundary of a job. Rows strictly older are archived.
///
/// Held at second precision and without a zone, matching how source tables
/// store their timestamp columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cutoff(NaiveDateTime);

impl Cutoff {
    /// `reference - days`, truncated to whole seconds.
    pub fn from_reference(reference: NaiveDateTime, days: f64) -> Result<Self, CutoffError> {
        if !days.is_finite() || days < 0.0 {
            return Err(CutoffError::InvalidDuration(days));
        }

        let millis = (days * MILLIS_PER_DAY).round();
        if millis > i64::MAX as f64 {
            return Err(CutoffError::OutOfRange { days, reference });
        }

        let cutoff = Duration::try_milliseconds(millis as i64)
            .and_then(|span| reference.checked_sub_signed(span))
            .and_then(|ts| ts.with_nanosecond(0))
            .ok_or(CutoffError::OutOfRange { days, reference })?;

        Ok(Self(cutoff))
    }

    /// A cutoff at an exact timestamp, truncated to whole seconds.
    pub fn at(timestamp: NaiveDateTime) -> Self {
        Self(timestamp.with_nanosecond(0).unwrap_or(timestamp))
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.0
    }

    /// The cutoff as `YYYY-MM-DD HH:MM:SS`.
    pub fn formatted(&self) -> String {
        self.0.format(CUTOFF_FORMAT).to_string()
    }
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CUTOFF_FORMAT))
    }
}

/// Wall-clock time in `offset`, as the naive reference for a new job.
pub fn reference_now(offset: FixedOffset) -> NaiveDateTime {
    reference_at(Utc::now(), offset)
}

/// `instant` expressed as local time in `offset`.
pub fn reference_at(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    instant.with_timezone(&offset).naive_local()
}
