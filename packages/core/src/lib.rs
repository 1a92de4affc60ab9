//! Core domain types for the job spooler.
//!
//! This crate contains the plain types shared by the engine and its callers:
//! - JobId, JobFault and JobOutcome for submitted work
//! - SpoolerId, SpoolerState and SpoolerStats for engine instances
//! - SpoolerConfig for tuning an engine
//! - Events for lifecycle notifications

mod config;
mod error;
mod events;
mod job;
mod spooler;

pub use config::SpoolerConfig;
pub use error::{ConfigError, SpoolerError};
pub use events::SpoolerEvent;
pub use job::{JobFault, JobId, JobOutcome};
pub use spooler::{SpoolerId, SpoolerState, SpoolerStats};
