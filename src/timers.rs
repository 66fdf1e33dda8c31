//! Cancelable groups of single-shot delayed callbacks.
//!
//! Timers run on the Tokio timer wheel, so a paused test runtime drives them
//! in virtual time.

use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle to one scheduled callback.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Prevents the callback from firing if it has not fired yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Returns `true` once the callback ran or the timer was cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Owns a group of timers that can be cancelled in one operation.
///
/// Cancellation only prevents future firings. A callback that already ran
/// is unaffected, and work it spawned keeps running.
#[derive(Debug, Default)]
pub struct ScheduledTimerSet {
    handles: Vec<TimerHandle>,
}

impl ScheduledTimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` once after `delay`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn schedule<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        let handle = TimerHandle {
            abort: task.abort_handle(),
        };
        self.handles.push(handle.clone());
        handle
    }

    /// Invalidates every held timer and clears the set.
    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.cancel();
        }
    }

    /// Number of timers held, fired or not.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for ScheduledTimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
