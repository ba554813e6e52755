#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in the `keyed_lanes` workspace.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// How often [`wait_until()`] re-checks its condition.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a test with a timeout to prevent infinite hangs.
///
/// If the test takes longer than the timeout to complete, the test fails instead of hanging the
/// CI/build system. The timeout is 30 seconds under normal conditions (the slowest scheduler
/// tests deliberately queue ten seconds of work) and 120 seconds under Miri.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly. This allows mutation testing to properly detect
/// hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode), or re-raises the
/// test's own panic.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(30)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {timeout:?} timeout");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Polls `condition` until it returns `true` or `timeout` elapses.
///
/// Returns whether the condition became true in time. The condition is always checked at
/// least once, and once more after the deadline has passed, so a condition that becomes true
/// right at the deadline is still seen.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::thread;
/// use std::time::Duration;
///
/// use testing::wait_until;
///
/// let done = Arc::new(AtomicBool::new(false));
///
/// thread::spawn({
///     let done = Arc::clone(&done);
///     move || done.store(true, Ordering::Release)
/// });
///
/// assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::Acquire)));
/// ```
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now().checked_add(timeout);

    loop {
        if condition() {
            return true;
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return condition();
        }

        thread::sleep(POLL_INTERVAL);
    }
}
