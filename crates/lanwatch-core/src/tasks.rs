//! Task accounting shared by pipeline stages and liveness supervisors

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// How a long-running task ended
pub trait TaskOutcome {
    /// True when the task stopped because shutdown was requested
    fn was_cancelled(&self) -> bool;
}

impl<T: TaskOutcome, E> TaskOutcome for Result<T, E> {
    fn was_cancelled(&self) -> bool {
        matches!(self, Ok(outcome) if outcome.was_cancelled())
    }
}

/// Point-in-time task counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub active: usize,
    pub finished: usize,
    pub cancelled: usize,
}

/// Counters for every task spawned through [`TaskStats::instrument`]
#[derive(Debug, Default)]
pub struct TaskStats {
    started: AtomicUsize,
    finished: AtomicUsize,
    cancelled: AtomicUsize,
}

impl TaskStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wrap a task future so its start and end are counted.
    ///
    /// The task counts as started as soon as this is called, not when it is
    /// first polled, so a freshly spawned task is never invisible. A task
    /// that panics counts as finished; one dropped before completing (an
    /// aborted task, say) counts as cancelled.
    pub fn instrument<F>(self: &Arc<Self>, task: F) -> impl Future<Output = F::Output>
    where
        F: Future,
        F::Output: TaskOutcome,
    {
        self.started.fetch_add(1, Ordering::Relaxed);
        let mut completion = Completion {
            stats: Arc::clone(self),
            cancelled: None,
        };
        async move {
            let outcome = task.await;
            completion.record(outcome.was_cancelled());
            outcome
        }
    }

    pub fn counts(&self) -> TaskCounts {
        let started = self.started.load(Ordering::Relaxed);
        let finished = self.finished.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        TaskCounts {
            active: started.saturating_sub(finished + cancelled),
            finished,
            cancelled,
        }
    }
}

/// Records how a task ended when dropped, on every exit path
struct Completion {
    stats: Arc<TaskStats>,
    cancelled: Option<bool>,
}

impl Completion {
    fn record(&mut self, cancelled: bool) {
        self.cancelled = Some(cancelled);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let cancelled = match self.cancelled {
            Some(cancelled) => cancelled,
            None => !std::thread::panicking(),
        };
        let counter = if cancelled {
            &self.stats.cancelled
        } else {
            &self.stats.finished
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
