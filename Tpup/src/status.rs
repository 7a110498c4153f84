//! Shared run status: progress counters, log/error queues, cancellation
//!
//! One [`RunStatus`] lives for the lifetime of an engine instance. Workers
//! push into it from any thread; front ends poll and drain it at their own
//! cadence, during the run or after it has terminated.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// Every item was attempted
    Completed,
    /// `stop()` was requested before the list was exhausted
    Cancelled,
    /// A fatal condition (missing or vanished root) aborted the run
    FatalError,
}

/// Lifecycle of one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    /// Constructed, `start()` not yet called
    Created,
    /// Building the work list
    Scanning,
    /// Workers are claiming items
    Dispatching,
    /// No more items will be claimed; in-flight items are finishing
    Draining,
    /// All workers have exited
    Terminated(Termination),
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Created => f.write_str("created"),
            RunPhase::Scanning => f.write_str("scanning"),
            RunPhase::Dispatching => f.write_str("dispatching"),
            RunPhase::Draining => f.write_str("draining"),
            RunPhase::Terminated(Termination::Completed) => f.write_str("completed"),
            RunPhase::Terminated(Termination::Cancelled) => f.write_str("cancelled"),
            RunPhase::Terminated(Termination::FatalError) => f.write_str("failed"),
        }
    }
}

/// Cloneable cancellation flag, safe to hand to a signal handler
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation. Idempotent and non-blocking.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cross-thread status surface of one run
pub struct RunStatus {
    total: OnceLock<usize>,
    completed: AtomicUsize,
    items_failed: AtomicUsize,
    failed: AtomicUsize,
    cancel: CancelHandle,
    phase: Mutex<RunPhase>,
    log_tx: Sender<String>,
    log_rx: Receiver<String>,
    error_tx: Sender<String>,
    error_rx: Receiver<String>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatus {
    #[must_use]
    pub fn new() -> Self {
        let (log_tx, log_rx) = unbounded();
        let (error_tx, error_rx) = unbounded();
        Self {
            total: OnceLock::new(),
            completed: AtomicUsize::new(0),
            items_failed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancel: CancelHandle::default(),
            phase: Mutex::new(RunPhase::Created),
            log_tx,
            log_rx,
            error_tx,
            error_rx,
        }
    }

    // ==================== Progress ====================

    /// Publish the frozen item count. Only the first call has any effect.
    pub fn publish_total(&self, total: usize) {
        let _ = self.total.set(total);
    }

    /// `None` until scanning finishes, then the frozen item count
    #[must_use]
    pub fn progress_max(&self) -> Option<usize> {
        self.total.get().copied()
    }

    /// Number of items finished so far, successful or not
    #[must_use]
    pub fn progress_current(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Number of messages pushed to the error queue so far
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Number of work items that finished with an error.
    ///
    /// Scan-time errors are counted by [`RunStatus::error_count`] only.
    #[must_use]
    pub fn items_failed(&self) -> usize {
        self.items_failed.load(Ordering::SeqCst)
    }

    pub(crate) fn item_finished(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ==================== Queues ====================

    /// Push an informational line
    pub fn log(&self, line: impl Into<String>) {
        // Both ends live in `self`, so the channel cannot be disconnected
        let _ = self.log_tx.send(line.into());
    }

    /// Push an error line. Any error marks the run as failed.
    pub fn error(&self, line: impl Into<String>) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.error_tx.send(line.into());
    }

    /// Push the error line of a failed work item
    pub(crate) fn item_error(&self, line: impl Into<String>) {
        self.items_failed.fetch_add(1, Ordering::SeqCst);
        self.error(line);
    }

    /// Take every queued log line, oldest first
    pub fn drain_log(&self) -> Vec<String> {
        self.log_rx.try_iter().collect()
    }

    /// Take every queued error line, oldest first
    pub fn drain_errors(&self) -> Vec<String> {
        self.error_rx.try_iter().collect()
    }

    // ==================== Cancellation ====================

    /// Handle for requesting cancellation from another thread
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cancellation
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ==================== Phase ====================

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Move to `to` only if the current phase is `from`
    pub(crate) fn transition(&self, from: RunPhase, to: RunPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == from {
            *phase = to;
            true
        } else {
            false
        }
    }

    /// Move from `Created` to `Scanning`; false if the run already started
    pub(crate) fn begin(&self) -> bool {
        self.transition(RunPhase::Created, RunPhase::Scanning)
    }
}
