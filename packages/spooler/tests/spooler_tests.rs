#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spooler::{
    Fault, FnJob, JobFault, JobId, Listener, Spooler, SpoolerConfig, SpoolerError, SpoolerState,
    WAIT_FOREVER,
};

use common::{CollectingSink, Latch, PROMPT, Recorder, eventually, shutdown};

/// A job that blocks on `latch` after signalling `entered`.
type TestJob = FnJob<Box<dyn Fn() -> Result<(), JobFault> + Send + Sync>>;

fn blocking_job(entered: &Arc<Latch>, latch: &Arc<Latch>) -> TestJob {
    let entered = Arc::clone(entered);
    let latch = Arc::clone(latch);
    FnJob::new(Box::new(move || {
        entered.open();
        latch.wait();
        Ok(())
    }))
}

fn recording_job(log: &Arc<Mutex<Vec<u64>>>, token: u64) -> TestJob {
    let log = Arc::clone(log);
    FnJob::new(Box::new(move || {
        log.lock().push(token);
        Ok(())
    }))
}

#[test]
fn jobs_from_many_threads_run_in_id_order_one_at_a_time() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();

    let executed = Arc::new(Mutex::new(Vec::new()));
    let ids = Arc::new(Mutex::new(HashMap::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..4u64)
        .map(|t| {
            let spooler = spooler.clone();
            let executed = Arc::clone(&executed);
            let ids = Arc::clone(&ids);
            let active = Arc::clone(&active);
            let overlapped = Arc::clone(&overlapped);
            thread::spawn(move || {
                for n in 0..50u64 {
                    let token = t * 1000 + n;
                    let executed = Arc::clone(&executed);
                    let active = Arc::clone(&active);
                    let overlapped = Arc::clone(&overlapped);
                    let id = spooler.exec(FnJob::new(move || {
                        if active.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlapped.fetch_add(1, Ordering::SeqCst);
                        }
                        executed.lock().push(token);
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }));
                    ids.lock().insert(token, id);
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().map_err(|_| "submitter panicked")?;
    }

    assert!(spooler.wait_for(JobId::LATEST, PROMPT)?);
    assert!(spooler.wait_for_idle(PROMPT)?);

    let executed = executed.lock().clone();
    let ids = ids.lock().clone();
    assert_eq!(executed.len(), 200);
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);

    let order: Vec<JobId> = executed.iter().map(|token| ids[token]).collect();
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(order.first(), Some(&JobId(1)));
    assert_eq!(order.last(), Some(&JobId(200)));

    shutdown(&spooler);
    Ok(())
}

#[test]
fn canceled_job_is_skipped() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = spooler.exec(recording_job(&log, 1));
    let second = spooler.exec(recording_job(&log, 2));
    let third = spooler.exec(recording_job(&log, 3));
    assert_eq!((first, second, third), (JobId(1), JobId(2), JobId(3)));

    assert!(spooler.cancel(second));
    assert!(!spooler.cancel(second));
    assert!(spooler.get_job_of(second).is_none());
    assert_eq!(spooler.size(), 2);

    spooler.start();
    assert!(spooler.wait_for(third, PROMPT)?);

    assert_eq!(*log.lock(), vec![1, 3]);
    assert!(spooler.get_job_of(JobId(2)).is_none());
    assert_eq!(spooler.stats().canceled, 1);
    assert_eq!(spooler.stats().completed, 2);

    shutdown(&spooler);
    Ok(())
}

#[test]
fn cancel_rejects_running_unknown_and_null_ids() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    let running = spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());

    assert!(!spooler.cancel(running));
    assert!(spooler.get_job_of(running).is_some());
    assert!(!spooler.cancel(JobId(99)));
    assert!(!spooler.cancel(JobId::NULL));

    release.open();
    assert!(spooler.wait_for(running, PROMPT)?);
    assert!(!spooler.cancel(running));

    shutdown(&spooler);
    Ok(())
}

#[test]
fn wait_for_resolves_stale_latest_and_unknown_ids() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();
    let log = Arc::new(Mutex::new(Vec::new()));

    spooler.exec(recording_job(&log, 1));
    spooler.exec(recording_job(&log, 2));
    assert!(spooler.wait_for(JobId::LATEST, PROMPT)?);
    assert_eq!(log.lock().len(), 2);

    let started = Instant::now();
    assert!(spooler.wait_for(JobId(1), PROMPT)?);
    assert!(spooler.wait_for(JobId(2), PROMPT)?);
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(!spooler.wait_for(JobId(50), Duration::from_millis(10))?);

    shutdown(&spooler);
    Ok(())
}

#[test]
fn wait_for_times_out_on_a_blocked_job() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    let id = spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());

    let started = Instant::now();
    assert!(!spooler.wait_for(id, Duration::from_millis(50))?);
    assert!(started.elapsed() >= Duration::from_millis(50));

    release.open();
    assert!(spooler.wait_for(id, WAIT_FOREVER)?);

    shutdown(&spooler);
    Ok(())
}

#[test]
fn start_then_stop_without_jobs() -> Result<(), Box<dyn Error>> {
    let recorder = Recorder::new();
    let spooler = Spooler::new().with_listener(recorder.clone());
    assert_eq!(spooler.state(), SpoolerState::Stopped);

    assert!(spooler.start());
    assert!(spooler.is_started());
    assert!(spooler.stop());
    assert!(spooler.wait_for_stop(PROMPT)?);

    assert!(spooler.is_stopped());
    assert!(!spooler.is_alive());
    assert_eq!(spooler.worker_thread_id(), None);
    assert_eq!(spooler.state(), SpoolerState::Stopped);

    let calls = recorder.calls();
    assert_eq!(calls.first().map(String::as_str), Some("start"));
    assert_eq!(calls.last().map(String::as_str), Some("stop"));
    assert_eq!(recorder.count("ready"), 0);
    assert!(calls.iter().all(|c| !c.starts_with("job_")));
    Ok(())
}

#[test]
fn lifecycle_operations_are_idempotent() -> Result<(), Box<dyn Error>> {
    let recorder = Recorder::new();
    let spooler = Spooler::new().with_listener(recorder.clone());

    assert!(!spooler.stop());
    assert!(!spooler.resume());

    assert!(spooler.start());
    assert!(!spooler.start());
    assert!(spooler.pause());
    assert!(!spooler.pause());
    assert!(spooler.resume());
    assert!(!spooler.resume());

    assert!(spooler.stop());
    assert!(!spooler.stop());
    assert!(spooler.wait_for_stop(PROMPT)?);
    assert!(!spooler.stop());

    assert_eq!(recorder.count("start"), 1);
    assert_eq!(recorder.count("stop"), 1);
    Ok(())
}

#[test]
fn wait_for_idle_on_an_empty_started_spooler() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    assert!(!spooler.wait_for_idle(Duration::from_millis(10))?);

    spooler.start();
    let started = Instant::now();
    assert!(spooler.wait_for_idle(Duration::from_millis(1000))?);
    assert!(started.elapsed() < Duration::from_millis(500));

    shutdown(&spooler);
    assert!(!spooler.wait_for_idle(Duration::from_millis(10))?);
    Ok(())
}

#[test]
fn wait_for_idle_times_out_while_busy() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());

    assert!(!spooler.wait_for_idle(Duration::from_millis(30))?);
    release.open();
    assert!(spooler.wait_for_idle(PROMPT)?);

    shutdown(&spooler);
    Ok(())
}

/// Queues a short job every time the spooler goes idle, up to `limit` times.
struct Refiller {
    spooler: Mutex<Option<Spooler>>,
    refills: AtomicUsize,
    limit: usize,
}

impl Listener for Refiller {
    fn on_idle(&self) {
        if self.refills.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return;
        }
        if let Some(spooler) = self.spooler.lock().as_ref() {
            spooler.exec(FnJob::new(|| {
                thread::sleep(Duration::from_millis(20));
                Ok(())
            }));
        }
    }
}

#[test]
fn wait_for_idle_sees_a_drain_even_when_work_is_refilled() -> Result<(), Box<dyn Error>> {
    let refiller = Arc::new(Refiller {
        spooler: Mutex::new(None),
        refills: AtomicUsize::new(0),
        limit: 40,
    });
    let spooler = Spooler::new().with_listener(refiller.clone());
    *refiller.spooler.lock() = Some(spooler.clone());

    spooler.start();
    assert!(eventually(|| refiller.refills.load(Ordering::SeqCst) >= 2));

    let started = Instant::now();
    assert!(spooler.wait_for_idle(Duration::from_millis(300))?);
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(refiller.refills.load(Ordering::SeqCst) < 40);

    refiller.spooler.lock().take();
    shutdown(&spooler);
    Ok(())
}

#[test]
fn wait_for_idle_wakes_when_the_last_job_finishes_while_paused() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());
    assert!(spooler.pause());

    let waiter = {
        let spooler = spooler.clone();
        thread::spawn(move || {
            let started = Instant::now();
            (spooler.wait_for_idle(Duration::from_secs(3)), started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(50));
    release.open();

    let (idle, elapsed) = waiter.join().map_err(|_| "waiter panicked")?;
    assert_eq!(idle, Ok(true));
    assert!(elapsed < Duration::from_secs(1));
    assert!(spooler.is_empty());
    assert!(spooler.is_paused());

    spooler.resume();
    shutdown(&spooler);
    Ok(())
}

#[test]
fn failing_job_is_reported_once_and_the_worker_continues() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    let sink = CollectingSink::install(&spooler);
    spooler.start();

    let failing = spooler.exec(FnJob::new(|| Err(JobFault::failed("connection refused"))));
    assert!(spooler.wait_for(failing, PROMPT)?);
    assert_eq!(
        sink.faults(),
        vec![Fault::Job {
            id: failing,
            fault: JobFault::failed("connection refused"),
        }]
    );

    let log = Arc::new(Mutex::new(Vec::new()));
    let next = spooler.exec(recording_job(&log, 7));
    assert!(spooler.wait_for(next, PROMPT)?);
    assert_eq!(*log.lock(), vec![7]);
    assert_eq!(sink.faults().len(), 1);

    let stats = spooler.stats();
    assert_eq!((stats.completed, stats.failed), (1, 1));

    shutdown(&spooler);
    Ok(())
}

#[test]
fn panicking_job_is_contained() -> Result<(), Box<dyn Error>> {
    let recorder = Recorder::new();
    let spooler = Spooler::new().with_listener(recorder.clone());
    let sink = CollectingSink::install(&spooler);
    spooler.start();

    let id = spooler.exec(FnJob::new(|| panic!("worker must survive this")));
    assert!(spooler.wait_for(id, PROMPT)?);

    let after = spooler.submit(|| Ok(5));
    assert_eq!(after.wait()?.and_then(|o| o.value().copied()), Some(5));

    assert!(sink.faults().is_empty());
    assert_eq!(
        recorder
            .calls()
            .iter()
            .filter(|c| c.starts_with("err job #1: job panicked: worker must survive this"))
            .count(),
        1
    );
    assert!(spooler.is_alive());

    shutdown(&spooler);
    Ok(())
}

#[test]
fn blocking_waits_from_the_worker_thread_fail_fast() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();

    let inner = spooler.clone();
    let handle = spooler.submit(move || {
        Ok((
            inner.is_worker_thread(),
            inner.wait_for(JobId::LATEST, WAIT_FOREVER),
            inner.wait_for_idle(WAIT_FOREVER),
            inner.wait_for_stop(WAIT_FOREVER),
        ))
    });

    let outcome = handle.get(PROMPT)?.ok_or("job did not finish")?;
    let (on_worker, wait, idle, stop) = outcome.value().ok_or("job failed")?.clone();
    assert!(on_worker);
    assert_eq!(wait, Err(SpoolerError::WrongThread));
    assert_eq!(idle, Err(SpoolerError::WrongThread));
    assert_eq!(stop, Err(SpoolerError::WrongThread));
    assert!(!spooler.is_worker_thread());

    shutdown(&spooler);
    Ok(())
}

#[test]
fn pause_holds_jobs_until_resume() -> Result<(), Box<dyn Error>> {
    let recorder = Recorder::new();
    let spooler = Spooler::new().with_listener(recorder.clone());
    spooler.start();
    assert!(eventually(|| recorder.count("idle") == 1));

    assert!(spooler.pause());
    assert!(spooler.is_paused());

    let log = Arc::new(Mutex::new(Vec::new()));
    let id = spooler.exec(recording_job(&log, 1));
    assert!(eventually(|| recorder.count("pause") == 1));
    assert_eq!(spooler.state(), SpoolerState::Paused);

    assert!(!spooler.wait_for(id, Duration::from_millis(50))?);
    assert!(log.lock().is_empty());
    assert_eq!(spooler.size(), 1);

    assert!(spooler.resume());
    assert!(spooler.wait_for(id, PROMPT)?);
    assert_eq!(*log.lock(), vec![1]);
    assert_eq!(recorder.count("resume"), 1);

    shutdown(&spooler);
    Ok(())
}

#[test]
fn stop_while_paused_exits_without_resuming() -> Result<(), Box<dyn Error>> {
    let recorder = Recorder::new();
    let spooler = Spooler::new().with_listener(recorder.clone());
    spooler.pause();
    spooler.start();
    assert!(eventually(|| recorder.count("pause") == 1));

    assert!(spooler.stop());
    assert!(spooler.wait_for_stop(PROMPT)?);
    assert_eq!(recorder.count("resume"), 0);
    assert_eq!(recorder.calls().last().map(String::as_str), Some("stop"));
    Ok(())
}

#[test]
fn clear_discards_pending_but_not_running_jobs() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    let running = spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());

    let log = Arc::new(Mutex::new(Vec::new()));
    let pending: Vec<JobId> = (1..=3).map(|n| spooler.exec(recording_job(&log, n))).collect();
    assert_eq!(spooler.size(), 4);

    assert_eq!(spooler.clear(), 3);
    assert_eq!(spooler.size(), 1);
    for id in &pending {
        assert!(spooler.wait_for(*id, Duration::from_millis(10))?);
        assert!(!spooler.cancel(*id));
    }

    release.open();
    assert!(spooler.wait_for(running, PROMPT)?);
    assert!(spooler.wait_for_idle(PROMPT)?);
    assert!(log.lock().is_empty());
    assert_eq!(spooler.stats().discarded, 3);

    shutdown(&spooler);
    Ok(())
}

#[test]
fn stop_clears_pending_jobs_by_default() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::new();
    assert!(spooler.clear_on_stop());
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());
    let log = Arc::new(Mutex::new(Vec::new()));
    spooler.exec(recording_job(&log, 1));

    assert!(spooler.stop());
    assert!(spooler.is_quitting());
    assert_eq!(spooler.state(), SpoolerState::Stopping);
    release.open();
    assert!(spooler.wait_for_stop(PROMPT)?);

    assert!(log.lock().is_empty());
    assert!(spooler.is_empty());
    Ok(())
}

#[test]
fn pending_jobs_survive_a_restart_without_clear_on_stop() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::with_config(SpoolerConfig::default().with_clear_on_stop(false));
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());
    let log = Arc::new(Mutex::new(Vec::new()));
    let kept = spooler.exec(recording_job(&log, 1));

    assert!(spooler.stop());
    release.open();
    assert!(spooler.wait_for_stop(PROMPT)?);
    assert_eq!(spooler.size(), 1);
    assert!(log.lock().is_empty());

    assert!(spooler.start());
    assert!(spooler.wait_for(kept, PROMPT)?);
    assert_eq!(*log.lock(), vec![1]);

    shutdown(&spooler);
    Ok(())
}

#[test]
fn start_during_shutdown_waits_for_the_old_worker() -> Result<(), Box<dyn Error>> {
    let recorder = Recorder::new();
    let spooler = Spooler::new().with_listener(recorder.clone());
    spooler.start();

    let entered = Latch::new();
    let release = Latch::new();
    spooler.exec(blocking_job(&entered, &release));
    assert!(entered.wait());
    assert!(spooler.stop());

    let restarter = {
        let spooler = spooler.clone();
        thread::spawn(move || spooler.start())
    };
    thread::sleep(Duration::from_millis(20));
    release.open();
    assert!(restarter.join().map_err(|_| "restarter panicked")?);

    assert_eq!(spooler.state(), SpoolerState::Running);
    assert!(eventually(|| recorder.count("start") == 2));
    let calls = recorder.calls();
    let first_stop = calls.iter().position(|c| c == "stop");
    let second_start = calls.iter().rposition(|c| c == "start");
    assert!(first_stop < second_start);

    let handle = spooler.submit(|| Ok("after restart"));
    assert_eq!(
        handle.wait()?.and_then(|o| o.value().copied()),
        Some("after restart")
    );

    shutdown(&spooler);
    Ok(())
}

#[test]
fn listener_sees_callbacks_in_lifecycle_order() -> Result<(), Box<dyn Error>> {
    let recorder = Recorder::new();
    let spooler = Spooler::new().with_listener(recorder.clone());
    spooler.start();
    assert!(eventually(|| recorder.count("idle") == 1));

    let id = spooler.exec(FnJob::new(|| Ok(())));
    assert!(spooler.wait_for(id, PROMPT)?);
    assert!(eventually(|| recorder.count("idle") == 2));
    shutdown(&spooler);

    assert_eq!(
        recorder.calls(),
        vec!["start", "idle", "ready", "job_start 1", "job_done 1 ok", "idle", "stop"]
    );
    Ok(())
}

#[test]
fn worker_thread_uses_the_configured_name() -> Result<(), Box<dyn Error>> {
    let spooler = Spooler::with_config(
        SpoolerConfig::default()
            .with_name("rest-spooler")
            .with_stack_size(256 * 1024),
    );
    spooler.start();

    let handle = spooler.submit(|| Ok(thread::current().name().map(str::to_string)));
    let name = handle.wait()?.and_then(|o| o.value().cloned()).flatten();
    assert_eq!(name.as_deref(), Some("rest-spooler"));

    shutdown(&spooler);

    let unnamed = Spooler::new();
    unnamed.start();
    let handle = unnamed.submit(|| Ok(thread::current().name().map(str::to_string)));
    let name = handle.wait()?.and_then(|o| o.value().cloned()).flatten();
    assert_eq!(name, Some(format!("spooler-{}", unnamed.id())));
    shutdown(&unnamed);
    Ok(())
}
