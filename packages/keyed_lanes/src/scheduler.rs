//! Scheduler construction and lifecycle.

use std::any::type_name;
use std::fmt;
use std::hash::Hash;
use std::io;
use std::mem;
use std::num::NonZero;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle as ThreadJoinHandle};

use new_zealand::nz;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    BackoffPolicy, Error, Lane, LaneObserver, NoopObserver, Result, Submitter, Task, hash_key,
    lane_index, worker_loop,
};

const DEFAULT_THREAD_NAME_PREFIX: &str = "keyed_lanes";

// Used only if the platform cannot tell us how many processors we may use.
const FALLBACK_LANE_COUNT: NonZero<usize> = nz!(1);

pub(crate) struct SchedulerInner {
    lanes: Box<[Lane]>,
    lane_count: NonZero<usize>,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) observer: Arc<dyn LaneObserver>,
    pub(crate) stop_flag: AtomicBool,
    worker_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
}

impl fmt::Debug for SchedulerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle_count = self.worker_handles.lock().len();

        f.debug_struct(type_name::<Self>())
            .field("lane_count", &self.lane_count)
            .field("backoff", &self.backoff)
            .field("stopped", &self.is_stopped())
            .field("worker_count", &handle_count)
            .finish_non_exhaustive()
    }
}

impl SchedulerInner {
    #[allow(
        clippy::indexing_slicing,
        reason = "lane indexes come from lane_index() or the worker spawn loop, both bounded by lane_count"
    )]
    pub(crate) fn lane(&self, index: usize) -> &Lane {
        &self.lanes[index]
    }

    pub(crate) fn lane_count(&self) -> usize {
        self.lane_count.get()
    }

    pub(crate) fn route<K>(&self, key: &K) -> usize
    where
        K: Hash + ?Sized,
    {
        self.route_hash(hash_key(key))
    }

    pub(crate) fn route_hash(&self, hash: u64) -> usize {
        lane_index(hash, self.lane_count)
    }

    pub(crate) fn submit_hashed<F>(&self, hash: u64, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Acquire pairs with the Release in signal_stop(). A submit racing with stop() may still
        // get through; join_all_workers() discards such tasks.
        if self.is_stopped() {
            trace!(hash, "dropping task submitted after stop");
            return;
        }

        let lane = self.route_hash(hash);
        self.lane(lane).enqueue(Task::new(task));

        trace!(lane, "task submitted");
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub(crate) fn queued_tasks(&self) -> usize {
        self.lanes.iter().map(Lane::len).sum()
    }

    #[cfg_attr(test, mutants::skip)] // Removing this causes timeouts (workers never stop).
    pub(crate) fn signal_stop(&self) {
        // Release makes every enqueue that happened before stop() visible to workers that
        // observe the flag.
        if self.stop_flag.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(lane_count = self.lane_count.get(), "stop requested");

        // Cut short any backoff sleep so shutdown does not wait for the sleep to end.
        for handle in self.worker_handles.lock().iter() {
            handle.thread().unpark();
        }
    }

    fn join_all_workers(&self) {
        self.signal_stop();

        let handles = mem::take(&mut *self.worker_handles.lock());
        let current = thread::current().id();

        for handle in handles {
            // A task that owned the scheduler may be dropping it from a worker thread.
            // That worker exits on its own once the task returns.
            if handle.thread().id() == current {
                continue;
            }

            if let Err(payload) = handle.join() {
                // Task and observer panics are contained inside the worker loop, so this is a
                // bug in the worker itself. Propagate unless we are already unwinding.
                if !thread::panicking() {
                    panic::resume_unwind(payload);
                }
            }
        }

        let discarded: usize = self.lanes.iter().map(Lane::drain).sum();

        debug!(discarded, "scheduler stopped");
    }
}

fn noop_observer() -> Arc<dyn LaneObserver> {
    Arc::new(NoopObserver)
}

/// A fixed pool of worker lanes that runs same-key tasks in order on one dedicated thread.
///
/// Each lane has its own worker thread, started when the scheduler is built. A task submitted
/// with a key always goes to the same lane, determined by the key's hash, so tasks sharing a key
/// run one at a time in the order they were submitted. Tasks with different keys may run in
/// parallel on different lanes.
///
/// Idle workers poll their lane with an adaptive backoff (see [`BackoffPolicy`]) instead of
/// blocking, so neither submitting nor picking up a task involves a wake-up call.
///
/// # Lifetime
///
/// [`stop()`](Self::stop) tells all workers to exit after their current task. It does not wait
/// and does not run tasks that are still queued. Tasks submitted after `stop()` are dropped
/// without running.
///
/// When the scheduler is dropped:
/// 1. All workers are signaled to stop (if `stop()` was not already called).
/// 2. The drop blocks until every worker has finished its current task and exited.
/// 3. Tasks still queued are dropped without running.
///
/// # Panics
///
/// A panicking task does not take down its worker. The panic is logged, reported to the
/// [`LaneObserver`] (if any) and the worker moves on to the next task in its lane.
///
/// # Example
///
/// ```rust
/// use std::sync::mpsc;
///
/// use keyed_lanes::Scheduler;
///
/// let scheduler = Scheduler::new(4).unwrap();
/// let (tx, rx) = mpsc::channel();
///
/// for i in 0..3 {
///     let tx = tx.clone();
///     scheduler.submit("account-17", move || tx.send(i).unwrap());
/// }
///
/// // Same key, same lane: the tasks ran in submission order.
/// assert_eq!(rx.iter().take(3).collect::<Vec<_>>(), vec![0, 1, 2]);
/// ```
#[derive(Debug)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler with `lane_count` lanes and default settings.
    ///
    /// Use [`Scheduler::builder()`] for custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLaneCount`] if `lane_count` is zero and
    /// [`Error::WorkerSpawn`] if a worker thread cannot be started.
    pub fn new(lane_count: usize) -> Result<Self> {
        Self::builder().lane_count(lane_count).build()
    }

    /// Creates a builder for configuring the scheduler.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Queues `task` on the lane that `key` maps to.
    ///
    /// Never blocks. May be called from any thread, including from inside a running task.
    /// If the scheduler has been stopped, the task is dropped without running.
    pub fn submit<K, F>(&self, key: &K, task: F)
    where
        K: Hash + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit_hashed(hash_key(key), task);
    }

    /// Queues `task` on the lane that a precomputed key hash maps to.
    ///
    /// Use this when the key's hash is already known. Submitting the same hash always
    /// selects the same lane.
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

    /// Number of lanes (and worker threads) in this scheduler.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.inner.lane_count()
    }

    /// Number of tasks waiting in all lanes.
    ///
    /// This is a snapshot; it may be stale as soon as it is returned.
    #[must_use]
    pub fn queued_tasks(&self) -> usize {
        self.inner.queued_tasks()
    }

    /// Returns a cloneable handle that can submit tasks to this scheduler from other threads,
    /// including from inside tasks.
    #[must_use]
    pub fn submitter(&self) -> Submitter {
        Submitter::new(Arc::clone(&self.inner))
    }

    /// Signals all workers to exit. Does not wait for them.
    ///
    /// Workers finish the task they are running, if any, then exit. Queued tasks are not run.
    /// Calling this more than once has no further effect.
    pub fn stop(&self) {
        self.inner.signal_stop();
    }

    /// Whether [`stop()`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Stops the scheduler and blocks until every worker thread has exited.
    ///
    /// Same as dropping the scheduler, spelled out for call sites where the wait matters.
    /// Tasks still queued are dropped without running.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a worker thread that died unexpectedly.
    pub fn join(self) {
        drop(self);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.join_all_workers();
    }
}

/// Builder for configuring a [`Scheduler`].
pub struct SchedulerBuilder {
    lane_count: usize,
    backoff: BackoffPolicy,
    observer: Option<Arc<dyn LaneObserver>>,
    thread_name_prefix: String,
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("lane_count", &self.lane_count)
            .field("backoff", &self.backoff)
            .field("has_observer", &self.observer.is_some())
            .field("thread_name_prefix", &self.thread_name_prefix)
            .finish()
    }
}

impl SchedulerBuilder {
    fn new() -> Self {
        let lane_count = thread::available_parallelism().unwrap_or(FALLBACK_LANE_COUNT);

        Self {
            lane_count: lane_count.get(),
            backoff: BackoffPolicy::default(),
            observer: None,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }

    /// Sets the number of lanes, which is also the number of worker threads.
    ///
    /// Must be at least 1. Default is the number of processors available to the process.
    #[must_use]
    pub fn lane_count(mut self, count: usize) -> Self {
        self.lane_count = count;
        self
    }

    /// Sets how idle workers wait between polls of their lane.
    #[must_use]
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Registers an observer that is told about task starts, task panics and worker exits.
    #[must_use]
    pub fn observer<O>(mut self, observer: Arc<O>) -> Self
    where
        O: LaneObserver,
    {
        let observer: Arc<dyn LaneObserver> = observer;
        self.observer = Some(observer);
        self
    }

    /// Sets the prefix of worker thread names. Workers are named `{prefix}-lane-{index}`.
    ///
    /// Must not contain a NUL byte. Default is `keyed_lanes`.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Builds the scheduler and starts one worker thread per lane.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLaneCount`] if the lane count is zero,
    /// [`Error::InvalidBackoff`] if the backoff policy is inconsistent,
    /// [`Error::InvalidThreadNamePrefix`] if the thread name prefix contains a NUL byte and
    /// [`Error::WorkerSpawn`] if a worker thread cannot be started. In the last case any
    /// workers already started are stopped and joined first.
    pub fn build(self) -> Result<Scheduler> {
        self.build_with_spawner(|builder, work| builder.spawn(work))
    }

    /// Builds the scheduler, starting each worker thread through `spawn`.
    fn build_with_spawner<S>(self, mut spawn: S) -> Result<Scheduler>
    where
        S: FnMut(thread::Builder, Box<dyn FnOnce() + Send>) -> io::Result<ThreadJoinHandle<()>>,
    {
        let lane_count = NonZero::new(self.lane_count).ok_or(Error::InvalidLaneCount)?;
        self.backoff.validate()?;

        // Thread names are C strings on most platforms; spawning would panic on a NUL.
        if self.thread_name_prefix.contains('\0') {
            return Err(Error::InvalidThreadNamePrefix {
                prefix: self.thread_name_prefix,
            });
        }

        let lanes = (0..lane_count.get())
            .map(|_| Lane::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let inner = Arc::new(SchedulerInner {
            lanes,
            lane_count,
            backoff: self.backoff,
            observer: self.observer.unwrap_or_else(noop_observer),
            stop_flag: AtomicBool::new(false),
            worker_handles: Mutex::new(Vec::with_capacity(lane_count.get())),
        });

        for lane in 0..lane_count.get() {
            let inner_clone = Arc::clone(&inner);

            let builder =
                thread::Builder::new().name(format!("{}-lane-{lane}", self.thread_name_prefix));

            let spawned = spawn(
                builder,
                Box::new(move || {
                    debug!(lane, "worker thread started");
                    worker_loop(&inner_clone, lane);
                    debug!(lane, "worker thread exiting");
                }),
            );

            match spawned {
                Ok(handle) => inner.worker_handles.lock().push(handle),
                Err(source) => {
                    inner.join_all_workers();
                    return Err(Error::WorkerSpawn { lane, source });
                }
            }
        }

        debug!(lane_count = lane_count.get(), "scheduler started");

        Ok(Scheduler { inner })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Scheduler: Send, Sync);
    assert_impl_all!(SchedulerBuilder: Send);

    #[test]
    fn zero_lanes_is_rejected() {
        let result = Scheduler::new(0);

        assert!(matches!(result, Err(Error::InvalidLaneCount)));
    }

    #[test]
    fn invalid_backoff_is_rejected() {
        let result = Scheduler::builder()
            .lane_count(1)
            .backoff(BackoffPolicy::default().min_sleep(Duration::ZERO))
            .build();

        assert!(matches!(result, Err(Error::InvalidBackoff { .. })));
    }

    #[test]
    fn nul_in_thread_name_prefix_is_rejected() {
        let result = Scheduler::builder()
            .lane_count(1)
            .thread_name_prefix("a\0b")
            .build();

        assert!(matches!(
            result,
            Err(Error::InvalidThreadNamePrefix { prefix }) if prefix == "a\0b"
        ));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn failed_spawn_stops_and_joins_started_workers() {
        #[derive(Debug, Default)]
        struct StopCounter(AtomicUsize);

        impl LaneObserver for StopCounter {
            fn worker_stopped(&self, _lane: usize) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let observer = Arc::new(StopCounter::default());
        let mut attempts = 0_usize;

        let result = Scheduler::builder()
            .lane_count(4)
            .observer(Arc::clone(&observer))
            .build_with_spawner(|builder, work| {
                attempts += 1;

                if attempts == 3 {
                    Err(io::Error::other("thread limit reached"))
                } else {
                    builder.spawn(work)
                }
            });

        assert!(matches!(result, Err(Error::WorkerSpawn { lane: 2, .. })));
        assert_eq!(attempts, 3);

        // Joined before build returned, so both started workers have already exited.
        assert_eq!(observer.0.load(Ordering::Relaxed), 2);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn builder_default_has_at_least_one_lane() {
        let scheduler = Scheduler::builder().build().unwrap();

        assert!(scheduler.lane_count() >= 1);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn lane_count_is_as_requested() {
        let scheduler = Scheduler::new(5).unwrap();

        assert_eq!(scheduler.lane_count(), 5);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn route_is_deterministic_and_in_range() {
        let scheduler = Scheduler::new(7).unwrap();

        for i in 0..100_u32 {
            let first = scheduler.route(&i);
            assert!(first < 7);
            assert_eq!(first, scheduler.route(&i));
        }
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn route_matches_route_hash_of_key_hash() {
        let scheduler = Scheduler::new(3).unwrap();

        assert_eq!(
            scheduler.route("some key"),
            scheduler.route_hash(hash_key("some key"))
        );
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn worker_threads_are_named_with_prefix() {
        let scheduler = Scheduler::builder()
            .lane_count(1)
            .thread_name_prefix("orders")
            .build()
            .unwrap();
        let (tx, rx) = mpsc::channel();

        scheduler.submit("any", move || {
            tx.send(thread::current().name().map(str::to_string))
                .unwrap();
        });

        assert_eq!(rx.recv().unwrap().as_deref(), Some("orders-lane-0"));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn stop_is_idempotent() {
        let scheduler = Scheduler::new(2).unwrap();
        assert!(!scheduler.is_stopped());

        scheduler.stop();
        scheduler.stop();

        assert!(scheduler.is_stopped());
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn submit_after_stop_is_dropped() {
        let scheduler = Scheduler::new(1).unwrap();
        scheduler.stop();

        scheduler.submit("late", || unreachable!("must not run after stop"));

        assert_eq!(scheduler.queued_tasks(), 0);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn join_waits_for_every_worker() {
        #[derive(Debug, Default)]
        struct StopCounter(AtomicUsize);

        impl LaneObserver for StopCounter {
            fn worker_stopped(&self, _lane: usize) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let observer = Arc::new(StopCounter::default());
        let scheduler = Scheduler::builder()
            .lane_count(3)
            .observer(Arc::clone(&observer))
            .build()
            .unwrap();

        scheduler.join();

        assert_eq!(observer.0.load(Ordering::Relaxed), 3);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn drop_discards_queued_tasks() {
        let scheduler = Scheduler::new(1).unwrap();
        let inner = Arc::clone(&scheduler.inner);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // Park the only worker inside a task so later tasks stay queued.
        scheduler.submit("blocker", move || {
            started_tx.send(()).unwrap();
            drop(release_rx.recv());
        });
        started_rx.recv().unwrap();

        let marker = Arc::new(());
        for _ in 0..3 {
            let marker = Arc::clone(&marker);
            scheduler.submit("blocker", move || drop(marker));
        }
        assert_eq!(scheduler.queued_tasks(), 3);

        scheduler.stop();
        release_tx.send(()).unwrap();
        drop(scheduler);

        assert_eq!(inner.queued_tasks(), 0);
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
