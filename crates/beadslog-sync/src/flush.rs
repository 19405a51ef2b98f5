//! Dirty tracking and debounced flush scheduling.
//!
//! Writers call [`FlushScheduler::mark_dirty`]; a background thread runs
//! the flush callback once the debounce window closes. `mark_dirty(true)`
//! forces the next flush to clear export metadata first so downstream
//! integrity checks start from scratch. [`FlushScheduler::flush_now`]
//! bypasses the debounce entirely.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Flush callback: receives `full` (clear metadata hashes before export).
pub type FlushFn = dyn Fn(bool) -> Result<()> + Send + Sync;

#[derive(Debug, Default)]
struct FlushState {
    dirty: bool,
    full: bool,
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Inner {
    state: Mutex<FlushState>,
    cv: Condvar,
    debounce: Duration,
    flush: Box<FlushFn>,
}

impl Inner {
    /// Takes the pending flush work if the deadline has passed.
    fn take_due(&self) -> Option<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.dirty {
            return None;
        }
        match state.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                state.dirty = false;
                state.deadline = None;
                Some(std::mem::take(&mut state.full))
            }
            _ => None,
        }
    }

    fn run_flush(&self, full: bool) {
        if let Err(e) = (self.flush)(full) {
            warn!(error = %e, "flush failed, will retry on next mark_dirty");
            // No new deadline: the retry waits for the next mark_dirty.
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.dirty = true;
            state.full |= full;
        }
    }
}

/// Debounced background flusher.
pub struct FlushScheduler {
    inner: Arc<Inner>,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Starts the scheduler with the given debounce window and callback.
    pub fn new(debounce: Duration, flush: Box<FlushFn>) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(FlushState::default()),
            cv: Condvar::new(),
            debounce,
            flush,
        });

        let worker = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("beads-flush".into())
            .spawn(move || {
                loop {
                    // Check and wait under one guard so a mark_dirty between
                    // the two cannot slip past the condvar.
                    {
                        let state = worker.state.lock().unwrap_or_else(|e| e.into_inner());
                        if state.shutdown {
                            break;
                        }
                        let wait = match state.deadline {
                            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                            None => Duration::from_secs(3600),
                        };
                        if !wait.is_zero() {
                            let (state, _timeout) = worker
                                .cv
                                .wait_timeout(state, wait)
                                .unwrap_or_else(|e| e.into_inner());
                            if state.shutdown {
                                break;
                            }
                        }
                    }

                    if let Some(full) = worker.take_due() {
                        debug!(full, "debounce elapsed, flushing");
                        worker.run_flush(full);
                    }
                }
            })
            .expect("failed to spawn flush thread");

        Self {
            inner,
            handle: Some(handle),
        }
    }

    /// Starts the scheduler with the default debounce.
    pub fn with_default_debounce(flush: Box<FlushFn>) -> Self {
        Self::new(DEFAULT_DEBOUNCE, flush)
    }

    /// Marks the store dirty; the flush fires after the debounce window.
    ///
    /// `full` forces the next flush to clear export metadata first.
    pub fn mark_dirty(&self, full: bool) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.dirty = true;
        state.full |= full;
        state.deadline = Some(Instant::now() + self.inner.debounce);
        drop(state);
        self.inner.cv.notify_one();
    }

    /// Runs any pending flush immediately, bypassing the debounce.
    pub fn flush_now(&self) -> Result<()> {
        let full = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.deadline = None;
            std::mem::take(&mut state.full)
        };
        (self.inner.flush)(full)
    }

    /// Returns `true` if a flush is pending.
    pub fn is_dirty(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dirty
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.shutdown = true;
        }
        self.inner.cv.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
