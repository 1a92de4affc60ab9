//! Reference-counted start and stop for a shared spooler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use spool_core::SpoolerConfig;

use crate::spooler::Spooler;

struct RefInner {
    spooler: Spooler,
    refs: AtomicUsize,
    // Serializes each count update with its start/stop call.
    transition: Mutex<()>,
}

/// A spooler shared by independent owners.
///
/// The first [`RefSpooler::add_ref`] starts the engine and the
/// [`RefSpooler::unref`] that brings the count back to zero stops it, so the
/// engine runs exactly while at least one reference is outstanding. Clones
/// share the same count.
///
/// Owners must not take or release references from jobs running on the same
/// spooler: a restart waits for the previous worker to exit.
#[derive(Clone)]
pub struct RefSpooler {
    inner: Arc<RefInner>,
}

impl RefSpooler {
    pub fn new() -> Self {
        Self::from_spooler(Spooler::new())
    }

    pub fn with_config(config: SpoolerConfig) -> Self {
        Self::from_spooler(Spooler::with_config(config))
    }

    /// Wrap an existing (normally stopped) spooler.
    pub fn from_spooler(spooler: Spooler) -> Self {
        Self {
            inner: Arc::new(RefInner {
                spooler,
                refs: AtomicUsize::new(0),
                transition: Mutex::new(()),
            }),
        }
    }

    /// Take a reference; starts the spooler on 0 → 1. Returns the new count.
    pub fn add_ref(&self) -> usize {
        let inner = &self.inner;
        let _step = inner.transition.lock();
        let refs = inner.refs.fetch_add(1, Ordering::SeqCst) + 1;
        if refs == 1 {
            tracing::debug!("First reference on spooler {}", inner.spooler.id());
            inner.spooler.start();
        }
        refs
    }

    /// Release a reference; stops the spooler when the count reaches 0.
    ///
    /// Extra releases saturate at 0. Returns the new count.
    pub fn unref(&self) -> usize {
        let inner = &self.inner;
        let _step = inner.transition.lock();
        let refs = inner
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .unwrap_or(0);
        if refs == 0 {
            tracing::debug!("Last reference on spooler {} released", inner.spooler.id());
            inner.spooler.stop();
        }
        refs
    }

    /// Take a reference released when the returned lease is dropped.
    pub fn lease(&self) -> SpoolerLease {
        self.add_ref();
        SpoolerLease {
            owner: self.clone(),
        }
    }

    /// Current reference count.
    pub fn refs(&self) -> usize {
        self.inner.refs.load(Ordering::SeqCst)
    }

    /// The wrapped spooler, for submitting and waiting.
    pub fn spooler(&self) -> &Spooler {
        &self.inner.spooler
    }
}

impl Default for RefSpooler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RefSpooler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefSpooler")
            .field("refs", &self.refs())
            .field("spooler", &self.inner.spooler)
            .finish()
    }
}

/// One reference on a [`RefSpooler`], released on drop.
#[derive(Debug)]
pub struct SpoolerLease {
    owner: RefSpooler,
}

impl SpoolerLease {
    pub fn spooler(&self) -> &Spooler {
        self.owner.spooler()
    }
}

impl Drop for SpoolerLease {
    fn drop(&mut self) {
        self.owner.unref();
    }
}
