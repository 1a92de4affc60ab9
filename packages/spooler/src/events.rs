//! Listener that republishes notifications as serializable events.

use std::time::Duration;

use chrono::Utc;
use spool_core::{JobId, SpoolerEvent, SpoolerId};
use tokio::sync::broadcast;

use crate::listener::{Fault, Listener};

/// Forwards every callback to a broadcast channel as a [`SpoolerEvent`].
///
/// Sending never blocks the worker; events are dropped when nobody is
/// subscribed, and slow receivers observe a lag instead of stalling it.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    spooler_id: SpoolerId,
    tx: broadcast::Sender<SpoolerEvent>,
}

impl EventBroadcaster {
    pub fn new(spooler_id: SpoolerId, tx: broadcast::Sender<SpoolerEvent>) -> Self {
        Self { spooler_id, tx }
    }

    /// Create a broadcaster together with its first receiver.
    pub fn channel(
        spooler_id: SpoolerId,
        capacity: usize,
    ) -> (Self, broadcast::Receiver<SpoolerEvent>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self::new(spooler_id, tx), rx)
    }

    /// Subscribe another receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<SpoolerEvent> {
        self.tx.subscribe()
    }

    fn broadcast(&self, event: SpoolerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Listener for EventBroadcaster {
    fn on_start(&self) {
        self.broadcast(SpoolerEvent::Started {
            spooler_id: self.spooler_id,
            timestamp: Utc::now(),
        });
    }

    fn on_stop(&self) {
        self.broadcast(SpoolerEvent::Stopped {
            spooler_id: self.spooler_id,
            timestamp: Utc::now(),
        });
    }

    fn on_pause(&self) {
        self.broadcast(SpoolerEvent::Paused {
            spooler_id: self.spooler_id,
            timestamp: Utc::now(),
        });
    }

    fn on_resume(&self) {
        self.broadcast(SpoolerEvent::Resumed {
            spooler_id: self.spooler_id,
            timestamp: Utc::now(),
        });
    }

    fn on_ready(&self) {
        self.broadcast(SpoolerEvent::Ready {
            spooler_id: self.spooler_id,
            timestamp: Utc::now(),
        });
    }

    fn on_idle(&self) {
        self.broadcast(SpoolerEvent::Idle {
            spooler_id: self.spooler_id,
            timestamp: Utc::now(),
        });
    }

    fn on_job_start(&self, id: JobId) {
        self.broadcast(SpoolerEvent::JobStarted {
            spooler_id: self.spooler_id,
            job_id: id,
            timestamp: Utc::now(),
        });
    }

    fn on_job_done(&self, id: JobId, elapsed: Duration, failed: bool) {
        self.broadcast(SpoolerEvent::JobFinished {
            spooler_id: self.spooler_id,
            job_id: id,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            failed,
            timestamp: Utc::now(),
        });
    }

    fn on_err(&self, fault: &Fault) {
        self.broadcast(SpoolerEvent::Fault {
            spooler_id: self.spooler_id,
            job_id: fault.job_id(),
            message: fault.to_string(),
            timestamp: Utc::now(),
        });
    }
}
