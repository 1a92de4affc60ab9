//! Single-worker job spooler.
//!
//! This crate provides the engine that executes submitted jobs one at a
//! time, in submission order, on a dedicated thread.
//!
//! # Architecture
//!
//! - `Spooler` - Owns the worker thread and the job table
//! - `RefSpooler` - Starts and stops a shared `Spooler` by reference count
//! - `JobHandle` - Caller-side cancel/await for one submitted `Task`
//! - `ListenerHub` - Fans worker notifications out to `Listener`s
//!
//! # Usage
//!
//! ```ignore
//! use spooler::{Spooler, WAIT_FOREVER};
//!
//! let spooler = Spooler::new();
//! spooler.start();
//!
//! let handle = spooler.submit(|| Ok("done"));
//! let outcome = handle.get(WAIT_FOREVER)?;
//!
//! spooler.stop();
//! spooler.wait_for_stop(WAIT_FOREVER)?;
//! ```

mod events;
mod handle;
mod job;
mod listener;
mod ref_spooler;
mod spooler;

pub use events::EventBroadcaster;
pub use handle::JobHandle;
pub use job::{FnJob, Job, Task};
pub use listener::{ErrorSink, Fault, Listener, ListenerHub, TracingSink};
pub use ref_spooler::{RefSpooler, SpoolerLease};
pub use spooler::{Spooler, WAIT_FOREVER};

/// Re-export core types for convenience.
pub use spool_core::{
    ConfigError, JobFault, JobId, JobOutcome, SpoolerConfig, SpoolerError, SpoolerEvent,
    SpoolerId, SpoolerState, SpoolerStats,
};
