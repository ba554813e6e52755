//! Task wrapper for executing user-provided closures.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use crate::metrics::{EXECUTION_TIME_MS, SCHEDULING_DELAY_MS, TASK_PANICS};

/// A submitted closure together with the moment it was submitted.
pub(crate) struct Task {
    work: Box<dyn FnOnce() + Send + 'static>,
    submitted_at: Instant,
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum TaskOutcome {
    Completed,
    Panicked(String),
}

impl Task {
    pub(crate) fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Box::new(work),
            submitted_at: Instant::now(),
        }
    }

    /// Runs the task, containing any panic it raises.
    pub(crate) fn run(self) -> TaskOutcome {
        SCHEDULING_DELAY_MS.with(|e| e.observe_millis(self.submitted_at.elapsed()));

        let work = self.work;
        let result = EXECUTION_TIME_MS
            .with(|e| e.observe_duration_millis(|| panic::catch_unwind(AssertUnwindSafe(work))));

        match result {
            Ok(()) => TaskOutcome::Completed,
            Err(payload) => {
                TASK_PANICS.with(|e| e.observe_once());
                TaskOutcome::Panicked(panic_message(payload.as_ref()))
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn run_invokes_closure() {
        let counter = Arc::new(AtomicU32::new(0));

        let task = Task::new({
            let counter = Arc::clone(&counter);
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        assert_eq!(task.run(), TaskOutcome::Completed);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn run_captures_str_panic() {
        let task = Task::new(|| panic!("specific message"));

        assert_eq!(
            task.run(),
            TaskOutcome::Panicked("specific message".to_string())
        );
    }

    #[test]
    fn run_captures_formatted_panic() {
        let lane = 7;
        let task = Task::new(move || panic!("failed on lane {lane}"));

        assert_eq!(
            task.run(),
            TaskOutcome::Panicked("failed on lane 7".to_string())
        );
    }

    #[test]
    fn run_captures_non_string_panic() {
        let task = Task::new(|| panic::panic_any(42_u8));

        assert_eq!(
            task.run(),
            TaskOutcome::Panicked("<non-string panic payload>".to_string())
        );
    }

    #[test]
    fn dropping_unrun_task_drops_closure() {
        let marker = Arc::new(());

        let task = Task::new({
            let marker = Arc::clone(&marker);
            move || drop(marker)
        });
        assert_eq!(Arc::strong_count(&marker), 2);

        drop(task);
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
