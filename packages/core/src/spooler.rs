//! Spooler instance types: identity, lifecycle state and statistics.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a spooler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpoolerId(pub Ulid);

impl SpoolerId {
    /// Create a new unique spooler ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SpoolerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SpoolerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current lifecycle state of a spooler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoolerState {
    /// No worker thread exists.
    #[default]
    Stopped,
    /// The worker is draining jobs.
    Running,
    /// The worker is parked at the pause gate; queued jobs are kept.
    Paused,
    /// `stop()` was called and the worker is unwinding.
    Stopping,
}

impl SpoolerState {
    /// Derive the state from the raw lifecycle flags.
    pub fn from_flags(started: bool, running: bool, paused: bool) -> Self {
        match (started, running, paused) {
            (false, _, _) => SpoolerState::Stopped,
            (true, false, _) => SpoolerState::Stopping,
            (true, true, true) => SpoolerState::Paused,
            (true, true, false) => SpoolerState::Running,
        }
    }
}

impl std::fmt::Display for SpoolerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpoolerState::Stopped => write!(f, "stopped"),
            SpoolerState::Running => write!(f, "running"),
            SpoolerState::Paused => write!(f, "paused"),
            SpoolerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Counters describing what a spooler has done since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolerStats {
    /// Jobs accepted by `exec`.
    pub submitted: u64,
    /// Jobs still in the job table (pending or running).
    pub pending: u64,
    /// Jobs that ran without a fault.
    pub completed: u64,
    /// Jobs that ran and raised a fault.
    pub failed: u64,
    /// Jobs removed by `cancel` before they were dequeued.
    pub canceled: u64,
    /// Jobs dropped by `clear`.
    pub discarded: u64,
}

impl SpoolerStats {
    /// Total executed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}
