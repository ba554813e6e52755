//! Metrics for the lane workers.
//!
//! The events are per-thread to keep observation off the shared path; each worker thread
//! records into its own instances and `nm::Report::collect()` merges them.

use nm::{Event, Magnitude};

/// Histogram buckets for scheduling delay in milliseconds.
///
/// The scheduling delay is the time between `submit()` and the task starting. An idle lane
/// may be asleep for up to the backoff ceiling, so the buckets reach past 100 ms.
const SCHEDULING_DELAY_MS_BUCKETS: &[Magnitude] = &[0, 1, 2, 5, 10, 20, 50, 100, 200, 500, 1000];

/// Histogram buckets for task execution time in milliseconds.
const EXECUTION_TIME_MS_BUCKETS: &[Magnitude] = &[0, 1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000];

thread_local! {
    /// Delay between a task being submitted and its execution starting.
    pub(crate) static SCHEDULING_DELAY_MS: Event = Event::builder()
        .name("keyed_lanes_scheduling_delay_ms")
        .histogram(SCHEDULING_DELAY_MS_BUCKETS)
        .build();

    /// How long task closures take to run, including ones that panic.
    pub(crate) static EXECUTION_TIME_MS: Event = Event::builder()
        .name("keyed_lanes_execution_time_ms")
        .histogram(EXECUTION_TIME_MS_BUCKETS)
        .build();

    /// Tasks that panicked. The worker survives each of these.
    pub(crate) static TASK_PANICS: Event = Event::builder()
        .name("keyed_lanes_task_panics")
        .build();

    /// Times an idle worker went to sleep (as opposed to spinning or yielding).
    pub(crate) static IDLE_SLEEPS: Event = Event::builder()
        .name("keyed_lanes_idle_sleeps")
        .build();
}
