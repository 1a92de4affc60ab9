//! Error types surfaced synchronously to callers.

use thiserror::Error;

/// Misuse errors returned by spooler operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpoolerError {
    /// A blocking wait was issued from the worker thread, which would never return.
    #[error("forbidden call from the spooler worker thread")]
    WrongThread,
    /// The worker thread could not be spawned.
    #[error("failed to spawn spooler worker: {0}")]
    Spawn(String),
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}
