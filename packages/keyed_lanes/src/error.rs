//! Errors returned when building a scheduler.

use std::io;

use thiserror::Error;

/// Errors that can occur when building a [`Scheduler`][crate::Scheduler].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller asked for a scheduler without any lanes.
    #[error("lane count must be at least 1")]
    InvalidLaneCount,

    /// The backoff policy cannot be used by a worker.
    #[error("invalid backoff policy: {reason}")]
    InvalidBackoff {
        /// A human-readable description of the problem.
        reason: String,
    },

    /// The worker thread name prefix cannot be used as a thread name.
    #[error("thread name prefix {prefix:?} must not contain a NUL byte")]
    InvalidThreadNamePrefix {
        /// The rejected prefix.
        prefix: String,
    },

    /// The operating system refused to start a worker thread.
    ///
    /// Any workers that were already started are stopped and joined before this is returned.
    #[error("failed to spawn worker thread for lane {lane}")]
    WorkerSpawn {
        /// Index of the lane whose worker could not be started.
        lane: usize,

        /// The underlying error reported by the operating system.
        #[source]
        source: io::Error,
    },
}

/// A specialized `Result` type for scheduler operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn invalid_backoff_includes_reason() {
        let error = Error::InvalidBackoff {
            reason: "min_sleep is zero".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "invalid backoff policy: min_sleep is zero"
        );
    }

    #[test]
    fn invalid_thread_name_prefix_shows_prefix() {
        let error = Error::InvalidThreadNamePrefix {
            prefix: "a\0b".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "thread name prefix \"a\\0b\" must not contain a NUL byte"
        );
    }

    #[test]
    fn worker_spawn_exposes_source() {
        let error = Error::WorkerSpawn {
            lane: 3,
            source: io::Error::other("out of threads"),
        };

        assert_eq!(error.to_string(), "failed to spawn worker thread for lane 3");
        assert!(error.source().is_some());
    }
}
