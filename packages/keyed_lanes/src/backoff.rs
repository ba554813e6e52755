//! Adaptive pause strategy for workers whose lane is empty.

use std::hint;
use std::thread;
use std::time::Duration;

use crate::{Error, Result};

const DEFAULT_SPIN_POLLS: u32 = 100;
const DEFAULT_YIELD_POLLS: u32 = 100;
const DEFAULT_MIN_SLEEP: Duration = Duration::from_micros(10);
const DEFAULT_MAX_SLEEP: Duration = Duration::from_millis(100);

/// Controls how an idle worker waits before polling its lane again.
///
/// An idle worker first busy-waits for `spin_polls` consecutive empty polls, then yields its
/// time slice for `yield_polls` more, and after that sleeps. The first sleep lasts `min_sleep`
/// and each following one doubles, up to `max_sleep`. Finding any work resets the worker to
/// the busy-wait stage.
///
/// `max_sleep` is the worst-case delay between a task being submitted to an idle lane and the
/// worker noticing it.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use keyed_lanes::{BackoffPolicy, Scheduler};
///
/// let policy = BackoffPolicy::default()
///     .spin_polls(10)
///     .max_sleep(Duration::from_millis(5));
///
/// let scheduler = Scheduler::builder()
///     .lane_count(2)
///     .backoff(policy)
///     .build()
///     .unwrap();
/// # drop(scheduler);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffPolicy {
    spin_polls: u32,
    yield_polls: u32,
    min_sleep: Duration,
    max_sleep: Duration,
}

impl BackoffPolicy {
    /// Sets how many consecutive empty polls are followed by a busy-wait.
    ///
    /// Default is 100.
    #[must_use]
    pub fn spin_polls(mut self, count: u32) -> Self {
        self.spin_polls = count;
        self
    }

    /// Sets how many empty polls after the busy-wait stage are followed by a thread yield.
    ///
    /// Default is 100.
    #[must_use]
    pub fn yield_polls(mut self, count: u32) -> Self {
        self.yield_polls = count;
        self
    }

    /// Sets the length of the first sleep once the worker has stopped spinning and yielding.
    ///
    /// Must not be zero. Default is 10 microseconds.
    #[must_use]
    pub fn min_sleep(mut self, duration: Duration) -> Self {
        self.min_sleep = duration;
        self
    }

    /// Sets the longest a worker will sleep between two polls of an empty lane.
    ///
    /// Must not be less than `min_sleep`. Default is 100 milliseconds.
    #[must_use]
    pub fn max_sleep(mut self, duration: Duration) -> Self {
        self.max_sleep = duration;
        self
    }

    /// The longest a worker will sleep between two polls of an empty lane.
    #[must_use]
    pub fn max_sleep_duration(&self) -> Duration {
        self.max_sleep
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.min_sleep.is_zero() {
            return Err(Error::InvalidBackoff {
                reason: "min_sleep must not be zero".to_string(),
            });
        }

        if self.min_sleep > self.max_sleep {
            return Err(Error::InvalidBackoff {
                reason: format!(
                    "min_sleep ({:?}) must not exceed max_sleep ({:?})",
                    self.min_sleep, self.max_sleep
                ),
            });
        }

        Ok(())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            spin_polls: DEFAULT_SPIN_POLLS,
            yield_polls: DEFAULT_YIELD_POLLS,
            min_sleep: DEFAULT_MIN_SLEEP,
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }
}

/// One step of waiting. Later variants never wait less than earlier ones.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum Pause {
    Spin,
    Yield,
    Sleep(Duration),
}

/// Per-worker backoff state. Owned by exactly one worker thread.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,

    // Consecutive empty polls seen in the spin and yield stages.
    idle_polls: u32,

    next_sleep: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            idle_polls: 0,
            next_sleep: policy.min_sleep,
        }
    }

    /// Returns to the lowest-latency stage.
    pub(crate) fn on_work_found(&mut self) {
        self.idle_polls = 0;
        self.next_sleep = self.policy.min_sleep;
    }

    /// Decides how to wait after one more empty poll, without actually waiting.
    pub(crate) fn next_pause(&mut self) -> Pause {
        let spin_limit = self.policy.spin_polls;
        let yield_limit = spin_limit.saturating_add(self.policy.yield_polls);

        if self.idle_polls < spin_limit {
            self.idle_polls = self.idle_polls.saturating_add(1);
            return Pause::Spin;
        }

        if self.idle_polls < yield_limit {
            self.idle_polls = self.idle_polls.saturating_add(1);
            return Pause::Yield;
        }

        let sleep = self.next_sleep;
        self.next_sleep = sleep.saturating_mul(2).min(self.policy.max_sleep);

        Pause::Sleep(sleep)
    }

    /// Waits according to the current stage and advances to the next one.
    ///
    /// Sleeping uses thread parking, so unparking the worker thread cuts a sleep short.
    pub(crate) fn pause(&mut self) -> Pause {
        let pause = self.next_pause();

        match pause {
            Pause::Spin => hint::spin_loop(),
            Pause::Yield => thread::yield_now(),
            Pause::Sleep(duration) => thread::park_timeout(duration),
        }

        pause
    }
}
