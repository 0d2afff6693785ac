//! Execution facilities.
//!
//! A dispatcher hands each admitted task to an [`Executor`] chosen at
//! construction:
//! - [`SharedPool`]: the blocking pool of a tokio runtime (a process-wide one
//!   by default, started on first use)
//! - [`DedicatedThread`]: a fresh OS thread per task
//!
//! An executor that cannot run a job must drop it; dropping the job releases
//! the slot it was admitted with.

use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::runtime::{Handle, Runtime};

/// A unit of work ready to run.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs asynchronously, off the submitting thread.
pub trait Executor: Send + Sync + 'static {
    /// Start `job` without waiting for it. On error the job has been dropped.
    fn execute(&self, job: Job) -> std::io::Result<()>;

    fn facility(&self) -> Facility;
}

/// Which execution facility a dispatcher uses. Fixed per dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Facility {
    #[default]
    SharedPool,
    DedicatedThread,
}

impl Facility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharedPool => "shared_pool",
            Self::DedicatedThread => "dedicated_thread",
        }
    }
}

impl FromStr for Facility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pool" | "shared_pool" => Ok(Self::SharedPool),
            "thread" | "dedicated_thread" => Ok(Self::DedicatedThread),
            other => Err(format!(
                "unknown facility '{other}', expected 'pool' or 'thread'"
            )),
        }
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Never dropped: a runtime cannot be shut down from inside async context, and
// this one lives as long as the global dispatcher that relies on it.
static SHARED_RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();

fn shared_handle() -> std::io::Result<Handle> {
    let runtime = SHARED_RUNTIME.get_or_init(|| {
        match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("slotgate-pool")
            .build()
        {
            Ok(runtime) => {
                tracing::debug!("Shared pool runtime started");
                Some(runtime)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start shared pool runtime");
                None
            }
        }
    });

    runtime
        .as_ref()
        .map(|rt| rt.handle().clone())
        .ok_or_else(|| std::io::Error::other("shared pool runtime unavailable"))
}

/// Runs jobs on a tokio blocking pool.
#[derive(Debug, Clone, Default)]
pub struct SharedPool {
    handle: Option<Handle>,
}

impl SharedPool {
    /// Use the process-wide pool, started lazily on the first job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the blocking pool of an existing runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Executor for SharedPool {
    fn execute(&self, job: Job) -> std::io::Result<()> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => shared_handle()?,
        };
        // Completion is observed through the slot set, not the join handle.
        drop(handle.spawn_blocking(job));
        Ok(())
    }

    fn facility(&self) -> Facility {
        Facility::SharedPool
    }
}

/// Spawns one named OS thread per job.
#[derive(Debug)]
pub struct DedicatedThread {
    name: String,
    spawned: AtomicUsize,
}

impl DedicatedThread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawned: AtomicUsize::new(0),
        }
    }
}

impl Default for DedicatedThread {
    fn default() -> Self {
        Self::new("slotgate-worker")
    }
}

impl Executor for DedicatedThread {
    fn execute(&self, job: Job) -> std::io::Result<()> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        std::thread::Builder::new()
            .name(format!("{}-{n}", self.name))
            .spawn(job)
            .map(drop)
    }

    fn facility(&self) -> Facility {
        Facility::DedicatedThread
    }
}

/// Build the executor for `facility`.
pub fn for_facility(facility: Facility, thread_name: &str) -> std::sync::Arc<dyn Executor> {
    match facility {
        Facility::SharedPool => std::sync::Arc::new(SharedPool::new()),
        Facility::DedicatedThread => std::sync::Arc::new(DedicatedThread::new(thread_name)),
    }
}
