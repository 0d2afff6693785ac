//! slotgate: bounded-concurrency admission control for background work.
//!
//! A [`WorkDispatcher`] caps how many submitted tasks run at once. Submission
//! blocks while every slot is held; tasks run on a shared pool or on
//! dedicated threads; their failures are captured and surfaced later through
//! [`WorkDispatcher::drain`] and friends instead of unwinding into the caller.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod failure;
pub mod permit;
pub mod signal;
mod status;
pub mod task;

pub use config::{DispatcherConfig, MAX_CONCURRENCY, default_max_concurrency};
pub use dispatcher::WorkDispatcher;
pub use error::{Error, Result};
pub use executor::{DedicatedThread, Executor, Facility, Job, SharedPool};
pub use failure::{CapturedFailure, FailureBucket, FailureKind};
pub use permit::{BoundedSlotSet, SlotToken};
pub use signal::{SignalSet, WaitOutcome};
pub use status::DispatcherSnapshot;
pub use task::{TaskContext, TaskId};
