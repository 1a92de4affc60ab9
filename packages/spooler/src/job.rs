//! Job trait and the closure-backed task.

use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use spool_core::{JobFault, JobOutcome};

/// A unit of work executed by a spooler.
///
/// `run` is called at most once, on the worker thread, outside every spooler
/// lock. It may block. Returning an error or panicking is reported to the
/// spooler's listeners; the worker carries on with the next job either way.
pub trait Job: Send + Sync + 'static {
    /// Execute the job.
    fn run(&self) -> Result<(), JobFault>;

    /// Called once if the job leaves the spooler without running,
    /// through `cancel` or `clear`.
    fn discarded(&self) {}
}

/// A job backed by a plain closure that can run repeatedly.
pub struct FnJob<F>
where
    F: Fn() -> Result<(), JobFault> + Send + Sync + 'static,
{
    work: F,
}

impl<F> FnJob<F>
where
    F: Fn() -> Result<(), JobFault> + Send + Sync + 'static,
{
    pub fn new(work: F) -> Self {
        Self { work }
    }
}

impl<F> Job for FnJob<F>
where
    F: Fn() -> Result<(), JobFault> + Send + Sync + 'static,
{
    fn run(&self) -> Result<(), JobFault> {
        (self.work)()
    }
}

type Work<T> = Box<dyn FnOnce() -> Result<T, JobFault> + Send>;
type Callback<T> = Box<dyn FnOnce(&JobOutcome<T>) + Send>;

/// A job that records its own outcome.
///
/// The outcome slot is written exactly once, by the worker, before the job is
/// removed from the job table; handles read it after being woken.
pub struct Task<T> {
    work: Mutex<Option<Work<T>>>,
    callback: Mutex<Option<Callback<T>>>,
    outcome: OnceLock<JobOutcome<T>>,
    discarded: AtomicBool,
}

impl<T> Task<T>
where
    T: Send + Sync + 'static,
{
    /// Create a task from the work it performs.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<T, JobFault> + Send + 'static,
    {
        Self {
            work: Mutex::new(Some(Box::new(work))),
            callback: Mutex::new(None),
            outcome: OnceLock::new(),
            discarded: AtomicBool::new(false),
        }
    }

    /// Set a callback invoked on the worker thread once the outcome is recorded.
    pub fn with_callback<C>(self, callback: C) -> Self
    where
        C: FnOnce(&JobOutcome<T>) + Send + 'static,
    {
        *self.callback.lock() = Some(Box::new(callback));
        self
    }

    /// The recorded outcome, if the task has run.
    pub fn outcome(&self) -> Option<&JobOutcome<T>> {
        self.outcome.get()
    }

    /// Check if the task was canceled or cleared before it ran.
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }
}

impl<T> Job for Task<T>
where
    T: Send + Sync + 'static,
{
    fn run(&self) -> Result<(), JobFault> {
        let Some(work) = self.work.lock().take() else {
            return Ok(());
        };

        let started_at = Utc::now();
        let result = panic::catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|payload| Err(JobFault::from_panic(payload.as_ref())));
        let fault = result.as_ref().err().cloned();
        let outcome = self
            .outcome
            .get_or_init(|| JobOutcome::new(result, started_at));

        if let Some(callback) = self.callback.lock().take() {
            callback(outcome);
        }

        match fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn discarded(&self) {
        self.discarded.store(true, Ordering::Release);
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("ran", &self.outcome.get().is_some())
            .field("discarded", &self.discarded.load(Ordering::Relaxed))
            .finish()
    }
}
