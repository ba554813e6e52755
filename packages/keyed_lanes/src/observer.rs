//! Hook for observing lane-level events.

/// Receives notifications about what the lane workers are doing.
///
/// Register an observer with [`SchedulerBuilder::observer()`][crate::SchedulerBuilder::observer].
/// Every method has an empty default implementation, so an observer only needs to implement the
/// events it cares about.
///
/// Callbacks are invoked on the worker thread of the lane they describe, synchronously, so they
/// delay that lane's next task. A callback that panics is logged and otherwise ignored; the
/// worker keeps serving its lane.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use keyed_lanes::{LaneObserver, Scheduler};
///
/// #[derive(Debug, Default)]
/// struct PanicCounter(AtomicUsize);
///
/// impl LaneObserver for PanicCounter {
///     fn task_panicked(&self, _lane: usize, _message: &str) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
///
/// let observer = Arc::new(PanicCounter::default());
///
/// let scheduler = Scheduler::builder()
///     .lane_count(4)
///     .observer(Arc::clone(&observer))
///     .build()
///     .unwrap();
/// # drop(scheduler);
/// ```
pub trait LaneObserver: Send + Sync + 'static {
    /// A worker took a task off its lane and is about to run it.
    fn task_started(&self, lane: usize) {
        _ = lane;
    }

    /// A task panicked. The panic has been contained and the worker carries on.
    fn task_panicked(&self, lane: usize, message: &str) {
        _ = (lane, message);
    }

    /// A worker observed the stop signal and left its run loop.
    fn worker_stopped(&self, lane: usize) {
        _ = lane;
    }
}

/// Observer used when none is registered.
#[derive(Debug)]
pub(crate) struct NoopObserver;

impl LaneObserver for NoopObserver {}
