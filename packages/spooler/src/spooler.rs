//! The spooler: one worker thread draining a job table in submission order.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use spool_core::{
    JobFault, JobId, SpoolerConfig, SpoolerError, SpoolerEvent, SpoolerId, SpoolerState,
    SpoolerStats,
};
use tokio::sync::broadcast;

use crate::events::EventBroadcaster;
use crate::handle::JobHandle;
use crate::job::{Job, Task};
use crate::listener::{Fault, Listener, ListenerHub};

/// Timeout value meaning "wait as long as it takes".
pub const WAIT_FOREVER: Duration = Duration::ZERO;

/// In-flight jobs plus the sequence counters, guarded together.
struct Table {
    jobs: BTreeMap<JobId, Arc<dyn Job>>,
    /// Cursor: the last id the worker dequeued (or skipped past).
    id_first: u64,
    /// Highest id ever assigned.
    id_last: u64,
    /// Bumped each time the table is observed drained.
    idle_epoch: u64,
}

impl Table {
    /// The first job above the cursor. Ids missing below it were canceled.
    fn next_pending(&self) -> Option<(JobId, Arc<dyn Job>)> {
        self.jobs
            .range(JobId(self.id_first + 1)..)
            .next()
            .map(|(id, job)| (*id, Arc::clone(job)))
    }

    fn has_pending(&self) -> bool {
        self.jobs.range(JobId(self.id_first + 1)..).next().is_some()
    }

    /// Record a drained table and wake idle waiters. No-op while jobs remain.
    fn mark_idle_if_empty(&mut self, idle: &Condvar) {
        if self.jobs.is_empty() {
            self.idle_epoch = self.idle_epoch.wrapping_add(1);
            idle.notify_all();
        }
    }
}

struct Lifecycle {
    started: bool,
    thread: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Paused,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
    discarded: AtomicU64,
}

struct Inner {
    id: SpoolerId,
    config: SpoolerConfig,
    clear_on_stop: AtomicBool,
    running: AtomicBool,

    table: Mutex<Table>,
    work_ready: Condvar,
    job_done: Condvar,
    idle: Condvar,

    gate: Mutex<Gate>,
    gate_changed: Condvar,

    life: Mutex<Lifecycle>,
    stopped: Condvar,

    hub: ListenerHub,
    counters: Counters,
}

/// A job spooler with a single dedicated worker thread.
///
/// Jobs run one at a time, in strictly increasing id order, exactly once.
/// A failing job is reported to the listeners and does not affect later
/// jobs. The spooler is cheap to clone; clones share the same engine.
///
/// ```ignore
/// let spooler = Spooler::new();
/// spooler.start();
/// let handle = spooler.submit(|| Ok(2 + 2));
/// assert_eq!(handle.wait()?.and_then(|o| o.value().copied()), Some(4));
/// spooler.stop();
/// ```
#[derive(Clone)]
pub struct Spooler {
    inner: Arc<Inner>,
}

impl Spooler {
    /// Create a stopped spooler with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SpoolerConfig::default())
    }

    /// Create a stopped spooler.
    pub fn with_config(config: SpoolerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: SpoolerId::new(),
                clear_on_stop: AtomicBool::new(config.clear_on_stop),
                config,
                running: AtomicBool::new(false),
                table: Mutex::new(Table {
                    jobs: BTreeMap::new(),
                    id_first: 0,
                    id_last: 0,
                    idle_epoch: 0,
                }),
                work_ready: Condvar::new(),
                job_done: Condvar::new(),
                idle: Condvar::new(),
                gate: Mutex::new(Gate::Open),
                gate_changed: Condvar::new(),
                life: Mutex::new(Lifecycle {
                    started: false,
                    thread: None,
                    thread_id: None,
                }),
                stopped: Condvar::new(),
                hub: ListenerHub::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Register a listener.
    pub fn with_listener(self, listener: Arc<dyn Listener>) -> Self {
        self.inner.hub.add_listener(listener);
        self
    }

    /// Register an [`EventBroadcaster`] and return a receiver for its events.
    pub fn event_stream(&self, capacity: usize) -> broadcast::Receiver<SpoolerEvent> {
        let (broadcaster, rx) = EventBroadcaster::channel(self.inner.id, capacity);
        self.inner.hub.add_listener(Arc::new(broadcaster));
        rx
    }

    pub fn id(&self) -> SpoolerId {
        self.inner.id
    }

    /// The listener hub notified by the worker.
    pub fn hub(&self) -> &ListenerHub {
        &self.inner.hub
    }

    pub fn config(&self) -> &SpoolerConfig {
        &self.inner.config
    }

    // --- lifecycle -------------------------------------------------------

    /// Start the worker thread.
    ///
    /// Returns false if the spooler is already running. If a previous worker
    /// is still unwinding after `stop`, waits for it to exit first (from the
    /// worker thread itself this returns false instead).
    pub fn start(&self) -> bool {
        match self.try_start() {
            Ok(started) => started,
            Err(err) => {
                tracing::error!("Spooler {} failed to start: {}", self.inner.id, err);
                false
            }
        }
    }

    /// Like [`Spooler::start`], but surfaces thread spawn failures.
    pub fn try_start(&self) -> Result<bool, SpoolerError> {
        let inner = &self.inner;
        let mut life = inner.life.lock();
        while life.started {
            if inner.running.load(Ordering::SeqCst) {
                return Ok(false);
            }
            if life.thread_id == Some(thread::current().id()) {
                return Ok(false);
            }
            inner.stopped.wait(&mut life);
        }

        inner.running.store(true, Ordering::SeqCst);
        life.started = true;

        let mut builder = thread::Builder::new().name(self.thread_name());
        if let Some(bytes) = inner.config.stack_size {
            builder = builder.stack_size(bytes);
        }
        let worker = self.clone();
        match builder.spawn(move || worker.work()) {
            Ok(handle) => {
                life.thread_id = Some(handle.thread().id());
                life.thread = Some(handle);
                tracing::info!("Started spooler {}", inner.id);
                Ok(true)
            }
            Err(err) => {
                inner.running.store(false, Ordering::SeqCst);
                life.started = false;
                inner.stopped.notify_all();
                Err(SpoolerError::Spawn(err.to_string()))
            }
        }
    }

    /// Ask the worker to stop.
    ///
    /// Returns false if the spooler is not running. Pending jobs are
    /// discarded when clear-on-stop is set. A job already executing runs to
    /// completion; the worker exits right after it.
    pub fn stop(&self) -> bool {
        let inner = &self.inner;
        {
            let life = inner.life.lock();
            if !life.started || !inner.running.load(Ordering::SeqCst) {
                return false;
            }
            inner.running.store(false, Ordering::SeqCst);
        }

        tracing::info!("Stopping spooler {}", inner.id);
        if self.clear_on_stop() {
            self.clear();
        }
        self.interrupt();
        true
    }

    /// Close the pause gate. Returns false if already paused.
    pub fn pause(&self) -> bool {
        let mut gate = self.inner.gate.lock();
        if *gate == Gate::Paused {
            return false;
        }
        *gate = Gate::Paused;
        tracing::debug!("Pausing spooler {}", self.inner.id);
        true
    }

    /// Open the pause gate. Returns false if not paused.
    pub fn resume(&self) -> bool {
        let mut gate = self.inner.gate.lock();
        if *gate == Gate::Open {
            return false;
        }
        *gate = Gate::Open;
        self.inner.gate_changed.notify_all();
        tracing::debug!("Resuming spooler {}", self.inner.id);
        true
    }

    // --- jobs ------------------------------------------------------------

    /// Enqueue a job and return its id.
    ///
    /// Jobs may be submitted while stopped; they run once the spooler starts
    /// (unless a stop with clear-on-stop discards them first).
    pub fn exec<J: Job>(&self, job: J) -> JobId {
        self.exec_shared(Arc::new(job))
    }

    /// Enqueue a job that is also referenced elsewhere.
    pub fn exec_shared(&self, job: Arc<dyn Job>) -> JobId {
        let inner = &self.inner;
        let id = {
            let mut table = inner.table.lock();
            table.id_last += 1;
            let id = JobId(table.id_last);
            table.jobs.insert(id, job);
            inner.work_ready.notify_one();
            id
        };
        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Spooler {} enqueued job {}", inner.id, id);
        id
    }

    /// Enqueue a closure and get a handle to its outcome.
    pub fn submit<T, F>(&self, work: F) -> JobHandle<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, JobFault> + Send + 'static,
    {
        self.submit_task(Task::new(work))
    }

    /// Enqueue a task and get a handle to its outcome.
    pub fn submit_task<T>(&self, task: Task<T>) -> JobHandle<T>
    where
        T: Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let id = self.exec_shared(task.clone());
        JobHandle::new(self.clone(), id, task)
    }

    /// Remove a job that has not been dequeued yet.
    ///
    /// Returns false for the null id, for unknown or already-canceled ids,
    /// and for jobs that are running or done.
    pub fn cancel(&self, id: JobId) -> bool {
        if id.is_null() {
            return false;
        }
        let inner = &self.inner;
        let job = {
            let mut table = inner.table.lock();
            if id.0 <= table.id_first {
                return false;
            }
            let Some(job) = table.jobs.remove(&id) else {
                return false;
            };
            inner.job_done.notify_all();
            table.mark_idle_if_empty(&inner.idle);
            job
        };
        job.discarded();
        inner.counters.canceled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Spooler {} canceled job {}", inner.id, id);
        true
    }

    /// Discard every pending job and return how many were dropped.
    ///
    /// The job currently executing, if any, is left to finish.
    pub fn clear(&self) -> usize {
        let inner = &self.inner;
        let discarded: Vec<Arc<dyn Job>> = {
            let mut table = inner.table.lock();
            let first_pending = JobId(table.id_first + 1);
            let pending = table.jobs.split_off(&first_pending);
            inner.job_done.notify_all();
            if !pending.is_empty() {
                table.mark_idle_if_empty(&inner.idle);
            }
            pending.into_values().collect()
        };

        for job in &discarded {
            job.discarded();
        }
        let count = discarded.len();
        if count > 0 {
            inner
                .counters
                .discarded
                .fetch_add(count as u64, Ordering::Relaxed);
            tracing::debug!("Spooler {} discarded {} pending jobs", inner.id, count);
        }
        count
    }

    /// The job with this id, while it is pending or running.
    pub fn get_job_of(&self, id: JobId) -> Option<Arc<dyn Job>> {
        if id.is_null() {
            return None;
        }
        self.inner.table.lock().jobs.get(&id).cloned()
    }

    // --- waiting ---------------------------------------------------------

    /// Block until the job is terminal or the timeout elapses.
    ///
    /// `JobId::LATEST` waits for the most recently submitted job. Ids behind
    /// the worker's cursor, and assigned ids no longer in the table, are
    /// already terminal and return `Ok(true)` immediately. Ids never
    /// assigned return `Ok(false)`. [`WAIT_FOREVER`] disables the timeout.
    pub fn wait_for(&self, id: JobId, timeout: Duration) -> Result<bool, SpoolerError> {
        self.ensure_caller_thread()?;
        let deadline = deadline_after(timeout);
        let mut table = self.inner.table.lock();

        let id = if id.is_null() { JobId(table.id_last) } else { id };
        if id.0 > table.id_last {
            return Ok(false);
        }
        if id.0 < table.id_first {
            return Ok(true);
        }
        while table.jobs.contains_key(&id) {
            if !wait_until(&self.inner.job_done, &mut table, deadline) {
                return Ok(!table.jobs.contains_key(&id));
            }
        }
        Ok(true)
    }

    /// Block until the job table has been empty at least once since the call,
    /// or the timeout elapses.
    ///
    /// A drained table counts even if new work was queued before the caller
    /// woke up. Returns `Ok(false)` if the spooler is not started or stops
    /// meanwhile.
    pub fn wait_for_idle(&self, timeout: Duration) -> Result<bool, SpoolerError> {
        self.ensure_caller_thread()?;
        if !self.is_started() {
            return Ok(false);
        }
        let inner = &self.inner;
        let deadline = deadline_after(timeout);
        let mut table = inner.table.lock();
        let entered = table.idle_epoch;
        loop {
            if table.jobs.is_empty() || table.idle_epoch != entered {
                return Ok(true);
            }
            if !inner.running.load(Ordering::SeqCst) {
                return Ok(false);
            }
            if !wait_until(&inner.idle, &mut table, deadline) {
                return Ok(table.jobs.is_empty() || table.idle_epoch != entered);
            }
        }
    }

    /// Block until the worker thread has exited, or the timeout elapses.
    pub fn wait_for_stop(&self, timeout: Duration) -> Result<bool, SpoolerError> {
        self.ensure_caller_thread()?;
        let deadline = deadline_after(timeout);
        let mut life = self.inner.life.lock();
        while life.started {
            if !wait_until(&self.inner.stopped, &mut life, deadline) {
                return Ok(!life.started);
            }
        }
        Ok(true)
    }

    // --- introspection ---------------------------------------------------

    pub fn is_started(&self) -> bool {
        self.inner.life.lock().started
    }

    pub fn is_stopped(&self) -> bool {
        !self.is_started()
    }

    /// Check if `stop` was called and the worker has not exited yet.
    pub fn is_quitting(&self) -> bool {
        self.is_started() && !self.inner.running.load(Ordering::SeqCst)
    }

    /// Check if the worker thread exists and has not finished.
    pub fn is_alive(&self) -> bool {
        self.inner
            .life
            .lock()
            .thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.gate.lock() == Gate::Paused
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.lock().jobs.is_empty()
    }

    /// Number of jobs pending or running.
    pub fn size(&self) -> usize {
        self.inner.table.lock().jobs.len()
    }

    pub fn clear_on_stop(&self) -> bool {
        self.inner.clear_on_stop.load(Ordering::SeqCst)
    }

    pub fn set_clear_on_stop(&self, clear_on_stop: bool) {
        self.inner
            .clear_on_stop
            .store(clear_on_stop, Ordering::SeqCst);
    }

    /// The worker thread id, while a worker exists.
    pub fn worker_thread_id(&self) -> Option<ThreadId> {
        self.inner.life.lock().thread_id
    }

    /// Check if the caller is running on this spooler's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        self.worker_thread_id() == Some(thread::current().id())
    }

    pub fn state(&self) -> SpoolerState {
        SpoolerState::from_flags(
            self.is_started(),
            self.inner.running.load(Ordering::SeqCst),
            self.is_paused(),
        )
    }

    pub fn stats(&self) -> SpoolerStats {
        let counters = &self.inner.counters;
        SpoolerStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            pending: self.size() as u64,
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            canceled: counters.canceled.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    // --- worker ----------------------------------------------------------

    fn thread_name(&self) -> String {
        self.inner
            .config
            .name
            .clone()
            .unwrap_or_else(|| format!("spooler-{}", self.inner.id))
    }

    fn ensure_caller_thread(&self) -> Result<(), SpoolerError> {
        if self.is_worker_thread() {
            tracing::warn!(
                "Blocking wait on spooler {} issued from its own worker thread",
                self.inner.id
            );
            return Err(SpoolerError::WrongThread);
        }
        Ok(())
    }

    /// Break the worker out of its blocking waits.
    fn interrupt(&self) {
        let inner = &self.inner;
        {
            let _table = inner.table.lock();
            inner.work_ready.notify_all();
            inner.idle.notify_all();
        }
        {
            let _gate = inner.gate.lock();
            inner.gate_changed.notify_all();
        }
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn work(&self) {
        let inner = &self.inner;
        tracing::debug!("Spooler {} worker running", inner.id);
        inner.hub.on_start();

        while self.is_running() && self.pass_gate() {
            if let Some((id, job)) = self.next_job() {
                self.execute(id, job);
                thread::yield_now();
            }
        }

        inner.hub.on_stop();
        {
            let mut life = inner.life.lock();
            life.thread = None;
            life.thread_id = None;
            life.started = false;
            inner.stopped.notify_all();
        }
        {
            let _table = inner.table.lock();
            inner.idle.notify_all();
        }
        tracing::info!("Stopped spooler {}", inner.id);
    }

    /// Park at the pause gate while it is closed. False means stop.
    fn pass_gate(&self) -> bool {
        let inner = &self.inner;
        if *inner.gate.lock() == Gate::Open {
            return true;
        }

        inner.hub.on_pause();
        {
            let mut gate = inner.gate.lock();
            while *gate == Gate::Paused && self.is_running() {
                inner.gate_changed.wait(&mut gate);
            }
        }
        if !self.is_running() {
            return false;
        }
        inner.hub.on_resume();
        true
    }

    /// One dequeue attempt. When the table is drained, idles until work
    /// arrives and returns None so the caller passes the pause gate again.
    fn next_job(&self) -> Option<(JobId, Arc<dyn Job>)> {
        let inner = &self.inner;
        let mut table = inner.table.lock();
        if !self.is_running() {
            return None;
        }
        if let Some((id, job)) = table.next_pending() {
            table.id_first = id.0;
            return Some((id, job));
        }

        table.id_first = table.id_last;
        table.mark_idle_if_empty(&inner.idle);
        tracing::trace!("Spooler {} idle", inner.id);
        MutexGuard::unlocked(&mut table, || inner.hub.on_idle());

        while self.is_running() && !table.has_pending() {
            inner.work_ready.wait(&mut table);
        }
        if self.is_running() {
            MutexGuard::unlocked(&mut table, || inner.hub.on_ready());
        }
        None
    }

    fn execute(&self, id: JobId, job: Arc<dyn Job>) {
        let inner = &self.inner;
        tracing::trace!("Spooler {} running job {}", inner.id, id);
        inner.hub.on_job_start(id);

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| job.run()))
            .unwrap_or_else(|payload| Err(JobFault::from_panic(payload.as_ref())));
        let elapsed = started.elapsed();

        inner.hub.on_job_done(id, elapsed, result.is_err());
        match result {
            Ok(()) => {
                inner.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(fault) => {
                inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Spooler {} job {} failed: {}", inner.id, id, fault);
                inner.hub.on_err(&Fault::Job { id, fault });
            }
        }

        let mut table = inner.table.lock();
        table.jobs.remove(&id);
        inner.job_done.notify_all();
        table.mark_idle_if_empty(&inner.idle);
    }
}

impl Default for Spooler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Spooler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spooler")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("size", &self.size())
            .finish()
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Instant::now().checked_add(timeout)
    }
}

/// Wait on `condvar` until notified or past `deadline`. False means timed out.
fn wait_until<T>(condvar: &Condvar, guard: &mut MutexGuard<'_, T>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            condvar.wait(guard);
            true
        }
        Some(deadline) => !condvar.wait_until(guard, deadline).timed_out(),
    }
}
