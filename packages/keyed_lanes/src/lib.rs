#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Key-affinity task scheduler: tasks that share a key run in order on one dedicated lane.
//!
//! A [`Scheduler`] owns a fixed number of lanes, each served by its own worker thread. Every
//! submitted task carries a routing key. The key's hash picks the lane, so all tasks with the
//! same key land on the same worker and run one after another in submission order, while tasks
//! with different keys can run in parallel on other lanes.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::mpsc;
//!
//! use keyed_lanes::Scheduler;
//!
//! let scheduler = Scheduler::new(4).unwrap();
//! let (tx, rx) = mpsc::channel();
//!
//! for step in ["debit", "credit", "notify"] {
//!     let tx = tx.clone();
//!     scheduler.submit("order-1001", move || tx.send(step).unwrap());
//! }
//!
//! let steps: Vec<_> = rx.iter().take(3).collect();
//! assert_eq!(steps, vec!["debit", "credit", "notify"]);
//! ```
//!
//! # Key features
//!
//! - **Per-key ordering**: tasks submitted with the same key from one thread run in submission
//!   order, never concurrently with each other.
//! - **Stable routing**: a key always maps to the same lane for the life of the scheduler
//!   ([`Scheduler::route()`]). Key hashes are bit-mixed with [`spread()`] before being reduced to
//!   a lane index, so clustered hashes still use every lane.
//! - **Non-blocking hand-off**: submitting is a lock-free append. Idle workers poll with an
//!   adaptive backoff (spin, then yield, then sleeps of growing length up to a ceiling) instead
//!   of waiting on a condition variable. See [`BackoffPolicy`].
//! - **Re-entrant submission**: tasks can submit more work through a [`Submitter`].
//! - **Panic isolation**: a panicking task is logged and reported to the [`LaneObserver`], and the
//!   worker carries on with the next task.
//!
//! # Shutdown behavior
//!
//! [`Scheduler::stop()`] signals all workers to exit after their current task and returns
//! immediately. Dropping the [`Scheduler`] (or calling [`Scheduler::join()`]) stops it and waits
//! for the workers to exit. Tasks that are still queued at that point are dropped without
//! running, and tasks submitted after the stop are dropped as well.
//!
//! # Observability
//!
//! Worker lifecycle and task panics are logged through `tracing`. Scheduling delay, execution
//! time, panics and idle sleeps are recorded as `nm` events named `keyed_lanes_*`.

mod backoff;
mod error;
mod lane;
mod metrics;
mod observer;
mod routing;
mod scheduler;
mod submitter;
mod task;
mod worker;

pub use backoff::BackoffPolicy;
pub(crate) use backoff::{Backoff, Pause};
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use lane::Lane;
pub use observer::LaneObserver;
pub(crate) use observer::NoopObserver;
pub use routing::spread;
pub(crate) use routing::{hash_key, lane_index};
pub(crate) use scheduler::SchedulerInner;
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use submitter::Submitter;
pub(crate) use task::{Task, TaskOutcome, panic_message};
pub(crate) use worker::worker_loop;
