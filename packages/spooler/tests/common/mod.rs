#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use spooler::{ErrorSink, Fault, JobId, Listener, Spooler};

/// Generous bound for anything that should happen "promptly".
pub const PROMPT: Duration = Duration::from_secs(5);

/// Listener that records every callback as a short string.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl Listener for Recorder {
    fn on_start(&self) {
        self.push("start");
    }
    fn on_stop(&self) {
        self.push("stop");
    }
    fn on_pause(&self) {
        self.push("pause");
    }
    fn on_resume(&self) {
        self.push("resume");
    }
    fn on_ready(&self) {
        self.push("ready");
    }
    fn on_idle(&self) {
        self.push("idle");
    }
    fn on_job_start(&self, id: JobId) {
        self.push(format!("job_start {}", id.get()));
    }
    fn on_job_done(&self, id: JobId, _elapsed: Duration, failed: bool) {
        let verdict = if failed { "failed" } else { "ok" };
        self.push(format!("job_done {} {}", id.get(), verdict));
    }
    fn on_err(&self, fault: &Fault) {
        self.push(format!("err {}", fault));
    }
}

/// Error sink that keeps every fault it receives.
#[derive(Default)]
pub struct CollectingSink {
    faults: Mutex<Vec<Fault>>,
}

impl CollectingSink {
    pub fn install(spooler: &Spooler) -> Arc<Self> {
        let sink = Arc::new(Self::default());
        spooler.hub().set_error_sink(Some(sink.clone()));
        sink
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.faults.lock().clone()
    }
}

impl ErrorSink for CollectingSink {
    fn handle(&self, fault: &Fault) {
        self.faults.lock().push(fault.clone());
    }
}

/// One-shot gate a job can block on until the test opens it.
#[derive(Default)]
pub struct Latch {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Latch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block until opened; false if `PROMPT` elapses first.
    pub fn wait(&self) -> bool {
        let deadline = Instant::now() + PROMPT;
        let mut open = self.open.lock();
        while !*open {
            if self.changed.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

/// Poll `condition` until it holds or `PROMPT` elapses.
pub fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + PROMPT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Stop the spooler and wait for the worker to exit.
pub fn shutdown(spooler: &Spooler) {
    spooler.stop();
    assert_eq!(spooler.wait_for_stop(PROMPT), Ok(true));
}
