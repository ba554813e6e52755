//! Per-lane queue of pending tasks.

use crossbeam::queue::SegQueue;

use crate::Task;

/// Unbounded FIFO of tasks bound for one worker.
///
/// Any number of threads may enqueue. Only the lane's own worker dequeues, which is what makes
/// insertion order equal execution order within the lane.
#[derive(Debug, Default)]
pub(crate) struct Lane {
    tasks: SegQueue<Task>,
}

impl Lane {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&self, task: Task) {
        self.tasks.push(task);
    }

    pub(crate) fn try_dequeue(&self) -> Option<Task> {
        self.tasks.pop()
    }

    /// Number of queued tasks. Only a snapshot if producers are active.
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Drops every queued task without running it. Returns how many were discarded.
    pub(crate) fn drain(&self) -> usize {
        let mut discarded: usize = 0;

        while let Some(task) = self.tasks.pop() {
            drop(task);
            discarded = discarded.saturating_add(1);
        }

        discarded
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::TaskOutcome;

    assert_impl_all!(Lane: Send, Sync);

    #[test]
    fn new_lane_is_empty() {
        let lane = Lane::new();

        assert_eq!(lane.len(), 0);
        assert!(lane.try_dequeue().is_none());
    }

    #[test]
    fn dequeues_in_insertion_order() {
        let lane = Lane::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            lane.enqueue(Task::new(move || seen.lock().unwrap().push(i)));
        }
        assert_eq!(lane.len(), 5);

        while let Some(task) = lane.try_dequeue() {
            assert_eq!(task.run(), TaskOutcome::Completed);
        }

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drain_discards_without_running() {
        let lane = Lane::new();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            lane.enqueue(Task::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            }));
        }

        assert_eq!(lane.drain(), 3);
        assert_eq!(lane.len(), 0);
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn concurrent_producers_lose_nothing() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 500;

        let lane = Arc::new(Lane::new());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let lane = Arc::clone(&lane);
                thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        lane.enqueue(Task::new(|| {}));
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let mut dequeued = 0;
        while lane.try_dequeue().is_some() {
            dequeued += 1;
        }

        assert_eq!(dequeued, PRODUCERS * PER_PRODUCER);
    }
}
