//! Listener contract, fault routing and the hub the worker notifies.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use spool_core::{JobFault, JobId};

/// A fault delivered to `on_err`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// A job returned an error or panicked.
    #[error("job {id}: {fault}")]
    Job { id: JobId, fault: JobFault },
    /// A listener callback panicked.
    #[error("listener panicked in {callback}: {message}")]
    Listener {
        callback: &'static str,
        message: String,
    },
}

impl Fault {
    fn listener(callback: &'static str, payload: &(dyn std::any::Any + Send)) -> Self {
        Fault::Listener {
            callback,
            message: JobFault::from_panic(payload).message().to_string(),
        }
    }

    /// The job that raised this fault, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Fault::Job { id, .. } => Some(*id),
            Fault::Listener { .. } => None,
        }
    }
}

/// Receives spooler notifications.
///
/// Every method has an empty default, so implementors only override what they
/// need. Callbacks run synchronously on the worker thread and sit in its
/// critical path: keep them short. A panicking callback is caught and turned
/// into a [`Fault::Listener`].
pub trait Listener: Send + Sync {
    /// The worker thread started.
    fn on_start(&self) {}
    /// The worker thread is about to exit.
    fn on_stop(&self) {}
    /// The worker reached the pause gate.
    fn on_pause(&self) {}
    /// The worker left the pause gate.
    fn on_resume(&self) {}
    /// Work arrived after the spooler went idle.
    fn on_ready(&self) {}
    /// The job table was drained.
    fn on_idle(&self) {}
    /// A job was dequeued and is about to run.
    fn on_job_start(&self, _id: JobId) {}
    /// A job returned.
    fn on_job_done(&self, _id: JobId, _elapsed: Duration, _failed: bool) {}
    /// A job or another callback raised a fault.
    ///
    /// The default logs the fault.
    fn on_err(&self, fault: &Fault) {
        tracing::error!("Spooler fault: {}", fault);
    }
}

/// Last-resort destination for faults nobody else handled.
pub trait ErrorSink: Send + Sync {
    fn handle(&self, fault: &Fault);
}

impl<F> ErrorSink for F
where
    F: Fn(&Fault) + Send + Sync,
{
    fn handle(&self, fault: &Fault) {
        self(fault)
    }
}

/// Error sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn handle(&self, fault: &Fault) {
        match fault.job_id() {
            Some(id) => tracing::error!("Unhandled fault in job {}: {}", id, fault),
            None => tracing::error!("Unhandled spooler fault: {}", fault),
        }
    }
}

/// Fans notifications out to the registered listeners.
///
/// Each callback is isolated: a panicking listener is reported through
/// [`ListenerHub::on_err`] and the remaining listeners still run. Faults reach
/// the error sink when no listener is registered, or when a listener's own
/// `on_err` panics (the sink then gets the listener fault followed by the
/// original one). The sink is looked up at fault time.
pub struct ListenerHub {
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
    sink: RwLock<Option<Arc<dyn ErrorSink>>>,
}

impl ListenerHub {
    /// Create a hub with no listeners and the tracing sink.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            sink: RwLock::new(Some(Arc::new(TracingSink))),
        }
    }

    /// Register a listener; it is notified after the ones already registered.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.write().push(listener);
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        let mut listeners = self.listeners.write();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Check if a listener is registered.
    pub fn has_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        self.listeners
            .read()
            .iter()
            .any(|l| Arc::ptr_eq(l, listener))
    }

    /// Unregister every listener.
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Replace the error sink; `None` drops unhandled faults.
    pub fn set_error_sink(&self, sink: Option<Arc<dyn ErrorSink>>) {
        *self.sink.write() = sink;
    }

    pub fn error_sink(&self) -> Option<Arc<dyn ErrorSink>> {
        self.sink.read().clone()
    }

    pub fn on_start(&self) {
        self.dispatch("on_start", |l| l.on_start());
    }

    pub fn on_stop(&self) {
        self.dispatch("on_stop", |l| l.on_stop());
    }

    pub fn on_pause(&self) {
        self.dispatch("on_pause", |l| l.on_pause());
    }

    pub fn on_resume(&self) {
        self.dispatch("on_resume", |l| l.on_resume());
    }

    pub fn on_ready(&self) {
        self.dispatch("on_ready", |l| l.on_ready());
    }

    pub fn on_idle(&self) {
        self.dispatch("on_idle", |l| l.on_idle());
    }

    pub fn on_job_start(&self, id: JobId) {
        self.dispatch("on_job_start", |l| l.on_job_start(id));
    }

    pub fn on_job_done(&self, id: JobId, elapsed: Duration, failed: bool) {
        self.dispatch("on_job_done", |l| l.on_job_done(id, elapsed, failed));
    }

    /// Route a fault to the listeners, or to the sink when there are none.
    pub fn on_err(&self, fault: &Fault) {
        let listeners = self.snapshot();
        if listeners.is_empty() {
            self.sink(fault);
            return;
        }
        for listener in listeners {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| listener.on_err(fault)));
            if let Err(payload) = delivered {
                self.sink(&Fault::listener("on_err", payload.as_ref()));
                self.sink(fault);
            }
        }
    }

    fn dispatch<F>(&self, callback: &'static str, notify: F)
    where
        F: Fn(&dyn Listener),
    {
        for listener in self.snapshot() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref())));
            if let Err(payload) = delivered {
                self.on_err(&Fault::listener(callback, payload.as_ref()));
            }
        }
    }

    // Callbacks run on a copy so listeners may (un)register from inside one.
    fn snapshot(&self) -> Vec<Arc<dyn Listener>> {
        self.listeners.read().clone()
    }

    fn sink(&self, fault: &Fault) {
        if let Some(sink) = self.error_sink() {
            sink.handle(fault);
        }
    }
}

impl Default for ListenerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListenerHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHub")
            .field("listeners", &self.listener_count())
            .field("sink", &self.sink.read().is_some())
            .finish()
    }
}
