//! Event types for lifecycle notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, SpoolerId};

/// Events emitted by a spooler, one per listener callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SpoolerEvent {
    // Lifecycle events
    /// The worker thread started.
    Started {
        spooler_id: SpoolerId,
        timestamp: DateTime<Utc>,
    },
    /// The worker thread exited.
    Stopped {
        spooler_id: SpoolerId,
        timestamp: DateTime<Utc>,
    },
    /// The worker parked at the pause gate.
    Paused {
        spooler_id: SpoolerId,
        timestamp: DateTime<Utc>,
    },
    /// The worker left the pause gate.
    Resumed {
        spooler_id: SpoolerId,
        timestamp: DateTime<Utc>,
    },
    /// New work arrived after the spooler was idle.
    Ready {
        spooler_id: SpoolerId,
        timestamp: DateTime<Utc>,
    },
    /// The job table was drained.
    Idle {
        spooler_id: SpoolerId,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// The worker dequeued a job and is about to run it.
    JobStarted {
        spooler_id: SpoolerId,
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A job returned, successfully or not.
    JobFinished {
        spooler_id: SpoolerId,
        job_id: JobId,
        duration_ms: u64,
        failed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A job or a listener raised a fault.
    Fault {
        spooler_id: SpoolerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl SpoolerEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SpoolerEvent::Started { timestamp, .. } => *timestamp,
            SpoolerEvent::Stopped { timestamp, .. } => *timestamp,
            SpoolerEvent::Paused { timestamp, .. } => *timestamp,
            SpoolerEvent::Resumed { timestamp, .. } => *timestamp,
            SpoolerEvent::Ready { timestamp, .. } => *timestamp,
            SpoolerEvent::Idle { timestamp, .. } => *timestamp,
            SpoolerEvent::JobStarted { timestamp, .. } => *timestamp,
            SpoolerEvent::JobFinished { timestamp, .. } => *timestamp,
            SpoolerEvent::Fault { timestamp, .. } => *timestamp,
        }
    }

    /// Get the spooler that emitted this event.
    pub fn spooler_id(&self) -> SpoolerId {
        match self {
            SpoolerEvent::Started { spooler_id, .. } => *spooler_id,
            SpoolerEvent::Stopped { spooler_id, .. } => *spooler_id,
            SpoolerEvent::Paused { spooler_id, .. } => *spooler_id,
            SpoolerEvent::Resumed { spooler_id, .. } => *spooler_id,
            SpoolerEvent::Ready { spooler_id, .. } => *spooler_id,
            SpoolerEvent::Idle { spooler_id, .. } => *spooler_id,
            SpoolerEvent::JobStarted { spooler_id, .. } => *spooler_id,
            SpoolerEvent::JobFinished { spooler_id, .. } => *spooler_id,
            SpoolerEvent::Fault { spooler_id, .. } => *spooler_id,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            SpoolerEvent::JobStarted { job_id, .. } => Some(*job_id),
            SpoolerEvent::JobFinished { job_id, .. } => Some(*job_id),
            SpoolerEvent::Fault { job_id, .. } => *job_id,
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            SpoolerEvent::Started { spooler_id, .. } => format!("Spooler {} started", spooler_id),
            SpoolerEvent::Stopped { spooler_id, .. } => format!("Spooler {} stopped", spooler_id),
            SpoolerEvent::Paused { spooler_id, .. } => format!("Spooler {} paused", spooler_id),
            SpoolerEvent::Resumed { spooler_id, .. } => format!("Spooler {} resumed", spooler_id),
            SpoolerEvent::Ready { spooler_id, .. } => format!("Spooler {} ready", spooler_id),
            SpoolerEvent::Idle { spooler_id, .. } => format!("Spooler {} idle", spooler_id),
            SpoolerEvent::JobStarted { job_id, .. } => format!("Job {} started", job_id),
            SpoolerEvent::JobFinished {
                job_id,
                duration_ms,
                failed,
                ..
            } => {
                let verb = if *failed { "failed" } else { "completed" };
                format!("Job {} {} in {}ms", job_id, verb, duration_ms)
            }
            SpoolerEvent::Fault {
                job_id: Some(job_id),
                message,
                ..
            } => format!("Job {} fault: {}", job_id, message),
            SpoolerEvent::Fault { message, .. } => format!("Listener fault: {}", message),
        }
    }
}
