//! Work dispatcher: admission control, asynchronous handoff, deferred failures.
//!
//! `submit` blocks the caller until a slot is free, then hands the task to the
//! execution facility and returns. Failures raised by tasks never reach the
//! submitter directly; they accumulate in the dispatcher's failure bucket until
//! the foreground inspects or drains them:
//! - `exceptions()` copies them
//! - `clear_exceptions()` discards them
//! - `drain_exceptions()` empties the bucket and reports the first one
//! - `drain()` / `is_drained()` wait for idle slots first
//!
//! Failures that are never drained are kept forever and never crash anything.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::executor::{self, Executor, Facility};
use crate::failure::{CapturedFailure, FailureBucket};
use crate::permit::BoundedSlotSet;
use crate::status::DispatcherSnapshot;
use crate::task::{TaskContext, TaskId};

static GLOBAL: OnceLock<WorkDispatcher> = OnceLock::new();

pub struct WorkDispatcher {
    slots: BoundedSlotSet,
    failures: Arc<FailureBucket>,
    executor: Arc<dyn Executor>,
}

impl WorkDispatcher {
    /// Default capacity on the shared pool.
    pub fn new() -> Result<Self> {
        Self::from_config(DispatcherConfig::default())
    }

    /// `max_concurrency` slots on the shared pool.
    pub fn with_max_concurrency(max_concurrency: usize) -> Result<Self> {
        Self::from_config(DispatcherConfig::new().with_max_concurrency(max_concurrency))
    }

    pub fn from_config(config: DispatcherConfig) -> Result<Self> {
        let capacity = config.resolved_max_concurrency()?;
        let executor = executor::for_facility(config.facility, &config.thread_name);
        Self::with_executor(capacity, executor)
    }

    /// `capacity` slots feeding a caller-supplied executor.
    pub fn with_executor(capacity: usize, executor: Arc<dyn Executor>) -> Result<Self> {
        let slots = BoundedSlotSet::new(capacity)?;
        tracing::debug!(capacity, facility = %executor.facility(), "Dispatcher created");
        Ok(Self {
            slots,
            failures: Arc::new(FailureBucket::new()),
            executor,
        })
    }

    /// The process-wide dispatcher, created on first use from
    /// [`DispatcherConfig::from_env`] and never dropped. Invalid `SLOTGATE_*`
    /// overrides are logged and replaced by defaults.
    ///
    /// Its failure bucket is shared by every caller in the process, so one
    /// component draining it sees failures submitted by another.
    pub fn global() -> Result<&'static WorkDispatcher> {
        if let Some(dispatcher) = GLOBAL.get() {
            return Ok(dispatcher);
        }
        let dispatcher = Self::from_config_or_default(DispatcherConfig::from_env())?;
        Ok(GLOBAL.get_or_init(|| dispatcher))
    }

    fn from_config_or_default(config: Result<DispatcherConfig>) -> Result<Self> {
        config.and_then(Self::from_config).or_else(|e| {
            tracing::warn!(error = %e, "Ignoring invalid dispatcher settings, using defaults");
            Self::from_config(DispatcherConfig::default())
        })
    }

    /// Run `callback(argument)` in the background once a slot is free.
    ///
    /// Blocks until a slot is acquired; does not wait for the callback.
    pub fn submit<F, A, E>(&self, callback: F, argument: A) -> Result<TaskId>
    where
        F: FnOnce(A) -> std::result::Result<(), E> + Send + 'static,
        A: Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.dispatch(None, callback, argument)
    }

    /// Like [`submit`](Self::submit), tagging logs and captured failures with `label`.
    pub fn submit_named<F, A, E>(
        &self,
        label: impl Into<String>,
        callback: F,
        argument: A,
    ) -> Result<TaskId>
    where
        F: FnOnce(A) -> std::result::Result<(), E> + Send + 'static,
        A: Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.dispatch(Some(label.into()), callback, argument)
    }

    fn dispatch<F, A, E>(&self, label: Option<String>, callback: F, argument: A) -> Result<TaskId>
    where
        F: FnOnce(A) -> std::result::Result<(), E> + Send + 'static,
        A: Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let token = self.slots.acquire()?;
        let task = TaskContext::new(token, Arc::clone(&self.failures), label, callback, argument);
        let id = task.id();
        let slot = task.slot();

        tracing::trace!(slot, task_id = %id, "Handing task to executor");

        // On failure the executor has dropped the job, which released the slot.
        self.executor
            .execute(Box::new(move || task.run()))
            .map_err(|e| {
                tracing::error!(slot, task_id = %id, error = %e, "Executor rejected task");
                Error::Spawn(e)
            })?;

        Ok(id)
    }

    /// Copy of the failures captured so far. Does not clear them.
    pub fn exceptions(&self) -> Vec<CapturedFailure> {
        self.failures.snapshot()
    }

    pub fn clear_exceptions(&self) {
        self.failures.clear();
    }

    /// Empty the failure bucket; if it held anything, return the first
    /// inserted failure as [`Error::WorkerFailure`].
    pub fn drain_exceptions(&self) -> Result<()> {
        match self.failures.take_first() {
            Some(failure) => {
                tracing::debug!(
                    task_id = %failure.task_id(),
                    "Surfacing captured failure"
                );
                Err(Error::WorkerFailure(failure))
            }
            None => Ok(()),
        }
    }

    /// If every slot is free within `timeout`, drain exceptions and return
    /// `true`. On timeout return `false` and leave failures untouched.
    pub fn is_drained(&self, timeout: Duration) -> Result<bool> {
        if !self.slots.is_empty(timeout)? {
            return Ok(false);
        }
        self.drain_exceptions()?;
        Ok(true)
    }

    /// Block until every slot is free, then drain exceptions.
    ///
    /// Cannot be interrupted; poll [`is_drained`](Self::is_drained) for a
    /// bounded wait.
    pub fn drain(&self) -> Result<()> {
        self.slots.wait_for_empty()?;
        self.drain_exceptions()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn in_use(&self) -> Result<usize> {
        self.slots.in_use()
    }

    pub fn facility(&self) -> Facility {
        self.executor.facility()
    }

    pub fn snapshot(&self) -> Result<DispatcherSnapshot> {
        let available = self.slots.available()?;
        Ok(DispatcherSnapshot {
            capacity: self.capacity(),
            in_use: self.capacity() - available,
            available,
            facility: self.facility(),
            pending_failures: self.failures.len(),
        })
    }
}

impl std::fmt::Debug for WorkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkDispatcher")
            .field("slots", &self.slots)
            .field("facility", &self.executor.facility())
            .field("pending_failures", &self.failures.len())
            .finish()
    }
}
