//! Caller-side handle to one submitted task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use spool_core::{JobId, JobOutcome, SpoolerError};

use crate::job::Task;
use crate::spooler::{Spooler, WAIT_FOREVER};

/// Tracks a job submitted with [`Spooler::submit`] or [`Spooler::submit_task`].
///
/// A handle can be shared between caller threads. Blocking calls made from
/// the spooler's own worker thread fail with [`SpoolerError::WrongThread`].
pub struct JobHandle<T> {
    spooler: Spooler,
    id: AtomicU64,
    task: Arc<Task<T>>,
}

impl<T> JobHandle<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(spooler: Spooler, id: JobId, task: Arc<Task<T>>) -> Self {
        Self {
            spooler,
            id: AtomicU64::new(id.0),
            task,
        }
    }

    /// The job id, or [`JobId::NULL`] once the job was canceled through this handle.
    pub fn id(&self) -> JobId {
        JobId(self.id.load(Ordering::SeqCst))
    }

    /// Cancel the job if it has not been dequeued yet.
    pub fn cancel(&self) -> bool {
        if self.task.outcome().is_some() {
            return false;
        }
        let id = self.id();
        if id.is_null() || !self.spooler.cancel(id) {
            return false;
        }
        self.id.store(JobId::NULL.0, Ordering::SeqCst);
        true
    }

    /// Check if the job was canceled or cleared before it ran.
    pub fn is_canceled(&self) -> bool {
        self.task.outcome().is_none() && (self.id().is_null() || self.task.is_discarded())
    }

    /// Check if the job ran or will never run.
    pub fn is_done(&self) -> bool {
        self.task.outcome().is_some() || self.is_canceled()
    }

    /// The outcome, without waiting.
    pub fn outcome(&self) -> Option<&JobOutcome<T>> {
        self.task.outcome()
    }

    /// Wait up to `timeout` for the outcome.
    ///
    /// Returns `Ok(None)` if the job was canceled or the timeout elapsed.
    /// A failed job still yields its outcome; inspect [`JobOutcome::result`].
    pub fn get(&self, timeout: Duration) -> Result<Option<&JobOutcome<T>>, SpoolerError> {
        if let Some(outcome) = self.task.outcome() {
            return Ok(Some(outcome));
        }
        let id = self.id();
        if !id.is_null() {
            self.spooler.wait_for(id, timeout)?;
        }
        Ok(self.task.outcome())
    }

    /// Wait for the outcome without a timeout.
    pub fn wait(&self) -> Result<Option<&JobOutcome<T>>, SpoolerError> {
        self.get(WAIT_FOREVER)
    }

    /// The spooler the job was submitted to.
    pub fn spooler(&self) -> &Spooler {
        &self.spooler
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &JobId(self.id.load(Ordering::SeqCst)))
            .field("task", &self.task)
            .finish()
    }
}
