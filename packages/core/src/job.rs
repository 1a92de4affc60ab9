//! Job domain types for work submitted to a spooler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence id of a submitted job.
///
/// Ids are assigned densely starting at 1 and are never reused by the same
/// spooler. The value 0 is reserved: it means "no job" almost everywhere, but
/// the wait operations read it as "the most recently submitted job". Both
/// names below carry that value so call sites can say which one they mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// The "no job" sentinel.
    pub const NULL: JobId = JobId(0);

    /// The "latest submitted job" sentinel accepted by wait operations.
    ///
    /// Same value as [`JobId::NULL`].
    pub const LATEST: JobId = JobId(0);

    /// Check if this is the reserved sentinel value.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The raw sequence number.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A fault raised while a job was executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum JobFault {
    /// The job returned an error.
    #[error("job failed: {0}")]
    Failed(String),
    /// The job panicked; the payload is the panic message when it was a string.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobFault {
    /// Build a [`JobFault::Failed`] from anything displayable.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        JobFault::Failed(err.to_string())
    }

    /// Build a [`JobFault::Panicked`] from a payload caught by `catch_unwind`.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        JobFault::Panicked(message)
    }

    /// The human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            JobFault::Failed(m) | JobFault::Panicked(m) => m,
        }
    }
}

/// Outcome of an executed job, recorded exactly once by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome<T> {
    /// Value produced by the job, or the fault it raised.
    pub result: Result<T, JobFault>,
    /// When the worker began executing the job.
    pub started_at: DateTime<Utc>,
    /// When the job returned (or unwound).
    pub finished_at: DateTime<Utc>,
}

impl<T> JobOutcome<T> {
    pub fn new(result: Result<T, JobFault>, started_at: DateTime<Utc>) -> Self {
        Self {
            result,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Check if the job completed without a fault.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The produced value, if the job succeeded.
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The raised fault, if the job failed.
    pub fn fault(&self) -> Option<&JobFault> {
        self.result.as_ref().err()
    }

    /// Wall-clock execution time.
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self.result {
            Ok(_) => "completed",
            Err(_) => "failed",
        }
    }
}
