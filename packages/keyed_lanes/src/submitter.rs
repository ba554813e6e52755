//! Cloneable handle for submitting tasks.

use std::hash::Hash;
use std::sync::Arc;

use crate::{SchedulerInner, hash_key};

/// A handle for submitting tasks to a [`Scheduler`][crate::Scheduler].
///
/// Obtained from [`Scheduler::submitter()`][crate::Scheduler::submitter]. Submitters are cheap
/// to clone and can be moved to other threads or captured by tasks that submit follow-up work,
/// to the same lane or any other.
///
/// A submitter does not keep the workers alive: once the owning scheduler is stopped or
/// dropped, tasks submitted through it are dropped without running.
///
/// # Example
///
/// ```rust
/// use std::sync::mpsc;
///
/// use keyed_lanes::Scheduler;
///
/// let scheduler = Scheduler::new(2).unwrap();
/// let submitter = scheduler.submitter();
/// let (tx, rx) = mpsc::channel();
///
/// scheduler.submit("parent", move || {
///     // Follow-up work for another key, submitted from inside a running task.
///     submitter.submit("child", move || tx.send("child done").unwrap());
/// });
///
/// assert_eq!(rx.recv().unwrap(), "child done");
/// ```
#[derive(Clone, Debug)]
pub struct Submitter {
    inner: Arc<SchedulerInner>,
}

impl Submitter {
    pub(crate) fn new(inner: Arc<SchedulerInner>) -> Self {
        Self { inner }
    }

    /// Queues `task` on the lane that `key` maps to.
    ///
    /// See [`Scheduler::submit()`][crate::Scheduler::submit].
    pub fn submit<K, F>(&self, key: &K, task: F)
    where
        K: Hash + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit_hashed(hash_key(key), task);
    }

    /// Queues `task` on the lane that a precomputed key hash maps to.
    ///
    /// See [`Scheduler::submit_hashed()`][crate::Scheduler::submit_hashed].
    pub fn submit_hashed<F>(&self, hash: u64, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit_hashed(hash, task);
    }

    /// Returns the index of the lane that tasks with `key` are queued on.
    #[must_use]
    pub fn route<K>(&self, key: &K) -> usize
    where
        K: Hash + ?Sized,
    {
        self.inner.route(key)
    }

    /// Returns the index of the lane that tasks submitted with `hash` are queued on.
    #[must_use]
    pub fn route_hash(&self, hash: u64) -> usize {
        self.inner.route_hash(hash)
    }

    /// Number of lanes in the scheduler.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.inner.lane_count()
    }

    /// Whether the scheduler has been stopped. Submissions are dropped once this is `true`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}
