//! Worker thread logic for draining one lane.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, trace};

use crate::metrics::IDLE_SLEEPS;
use crate::{Backoff, Lane, LaneObserver, Pause, SchedulerInner, TaskOutcome, panic_message};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IterationResult {
    Executed,
    Panicked,
    Shutdown,
    Empty,
}

/// One poll of a lane: check the stop signal, then take and run at most one task.
pub(crate) struct WorkerCore<'a> {
    lane_index: usize,
    lane: &'a Lane,
    stop_flag: &'a AtomicBool,
    observer: &'a dyn LaneObserver,
}

impl<'a> WorkerCore<'a> {
    pub(crate) fn new(
        lane_index: usize,
        lane: &'a Lane,
        stop_flag: &'a AtomicBool,
        observer: &'a dyn LaneObserver,
    ) -> Self {
        Self {
            lane_index,
            lane,
            stop_flag,
            observer,
        }
    }

    pub(crate) fn run_one_iteration(&self) -> IterationResult {
        // Acquire pairs with the Release in signal_stop().
        if self.stop_flag.load(Ordering::Acquire) {
            return IterationResult::Shutdown;
        }

        let Some(task) = self.lane.try_dequeue() else {
            return IterationResult::Empty;
        };

        self.notify("task_started", |observer| observer.task_started(self.lane_index));

        match task.run() {
            TaskOutcome::Completed => {
                trace!(lane = self.lane_index, "executed task");
                IterationResult::Executed
            }
            TaskOutcome::Panicked(message) => {
                error!(lane = self.lane_index, %message, "task panicked");
                self.notify("task_panicked", |observer| {
                    observer.task_panicked(self.lane_index, &message);
                });
                IterationResult::Panicked
            }
        }
    }

    /// Invokes an observer callback. A panicking callback is logged and otherwise ignored,
    /// so the lane keeps being served.
    pub(crate) fn notify<F>(&self, callback: &'static str, f: F)
    where
        F: FnOnce(&dyn LaneObserver),
    {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(self.observer))) {
            let message = panic_message(payload.as_ref());
            error!(lane = self.lane_index, callback, %message, "lane observer panicked");
        }
    }
}

/// Polls the lane until the scheduler is stopped, backing off while the lane is empty.
pub(crate) fn worker_loop(inner: &SchedulerInner, lane_index: usize) {
    let core = WorkerCore::new(
        lane_index,
        inner.lane(lane_index),
        &inner.stop_flag,
        inner.observer.as_ref(),
    );
    let mut backoff = Backoff::new(inner.backoff);

    loop {
        match core.run_one_iteration() {
            IterationResult::Executed | IterationResult::Panicked => backoff.on_work_found(),
            IterationResult::Shutdown => break,
            IterationResult::Empty => {
                if let Pause::Sleep(_) = backoff.pause() {
                    IDLE_SLEEPS.with(|e| e.observe_once());
                }
            }
        }
    }

    core.notify("worker_stopped", |observer| observer.worker_stopped(lane_index));
}
