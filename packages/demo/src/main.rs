//! Drives a shared spooler the way a pair of REST clients would.
//!
//! Two clients lease the same spooler, queue a handful of requests, cancel
//! one, and release the spooler. Configure with `SPOOLER_NAME`,
//! `SPOOLER_CLEAR_ON_STOP` and `SPOOLER_STACK_SIZE`; set `RUST_LOG=debug`
//! for engine internals.

use std::error::Error;
use std::thread;
use std::time::Duration;

use spooler::{JobFault, RefSpooler, SpoolerConfig, Task, WAIT_FOREVER};
use tracing_subscriber::EnvFilter;

/// Stand-in for a network round trip.
fn request(path: &'static str, latency_ms: u64) -> Result<String, JobFault> {
    thread::sleep(Duration::from_millis(latency_ms));
    if path.starts_with("/missing") {
        return Err(JobFault::failed(format!("404 Not Found: {}", path)));
    }
    Ok(format!("200 OK: {}", path))
}

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SpoolerConfig::from_env()?;
    let shared = RefSpooler::with_config(config);
    let mut events = shared.spooler().event_stream(128);

    let alice = shared.lease();
    let bob = shared.lease();
    tracing::info!(
        "Spooler {} shared by {} clients",
        shared.spooler().id(),
        shared.refs()
    );

    let data = alice.spooler().submit(|| request("/data", 40));
    let device = bob.spooler().submit(|| request("/device/42", 20));
    let missing = bob.spooler().submit(|| request("/missing/7", 10));
    let skipped = alice.spooler().submit(|| request("/channel/history", 10));
    let logged = alice.spooler().submit_task(
        Task::new(|| request("/session", 5)).with_callback(|outcome| {
            tracing::info!(
                "Session request {} in {:?}",
                outcome.as_str(),
                outcome.duration()
            );
        }),
    );

    if skipped.cancel() {
        tracing::info!("Canceled the history request before it ran");
    }

    let requests = [
        ("data", &data),
        ("device", &device),
        ("missing", &missing),
        ("session", &logged),
    ];
    for (label, handle) in requests {
        match handle.wait()?.map(|outcome| &outcome.result) {
            Some(Ok(body)) => tracing::info!("{} -> {}", label, body),
            Some(Err(fault)) => tracing::warn!("{} -> {}", label, fault),
            None => tracing::warn!("{} -> canceled", label),
        }
    }

    let stats = shared.spooler().stats();
    tracing::info!(
        "Submitted {}, completed {}, failed {}, canceled {}",
        stats.submitted,
        stats.completed,
        stats.failed,
        stats.canceled
    );

    drop(bob);
    drop(alice);
    shared.spooler().wait_for_stop(WAIT_FOREVER)?;

    while let Ok(event) = events.try_recv() {
        tracing::debug!("{}", event.description());
    }
    Ok(())
}
