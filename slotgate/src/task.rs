//! Per-task execution wrapper.
//!
//! A [`TaskContext`] owns the callback, the slot token it was admitted with,
//! and a handle to the dispatcher's failure bucket. `run()` invokes the
//! callback under a failure boundary and releases the slot afterwards; a
//! context dropped without running releases its slot as well.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::failure::{CapturedFailure, FailureBucket, FailureKind};
use crate::permit::SlotToken;

/// Unique identifier for a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Callback = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// One admitted unit of work, ready to hand to an execution facility.
pub struct TaskContext {
    id: TaskId,
    label: Option<String>,
    callback: Callback,
    failures: Arc<FailureBucket>,
    token: SlotToken,
}

impl TaskContext {
    pub fn new<F, A, E>(
        token: SlotToken,
        failures: Arc<FailureBucket>,
        label: Option<String>,
        callback: F,
        argument: A,
    ) -> Self
    where
        F: FnOnce(A) -> Result<(), E> + Send + 'static,
        A: Send + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        Self {
            id: TaskId::new(),
            label,
            callback: Box::new(move || callback(argument).map_err(Into::into)),
            failures,
            token,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn slot(&self) -> usize {
        self.token.slot()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Run the callback. Errors and panics are appended to the failure bucket,
    /// never propagated. The slot is released after any failure is recorded,
    /// so a drain that observes the slot free also observes the failure.
    pub fn run(self) {
        let TaskContext {
            id,
            label,
            callback,
            failures,
            token,
        } = self;
        let slot = token.slot();
        let start = Instant::now();

        tracing::debug!(slot, task_id = %id, label = label.as_deref(), "Task started");

        let failure = match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(CapturedFailure::new(id, slot, label, FailureKind::Error, e)),
            Err(payload) => Some(CapturedFailure::from_panic(id, slot, label, payload)),
        };

        match failure {
            Some(failure) => {
                tracing::warn!(
                    slot,
                    task_id = %id,
                    kind = ?failure.kind(),
                    error = %failure.message(),
                    elapsed = ?start.elapsed(),
                    "Task failed - failure captured"
                );
                failures.push(failure);
            }
            None => {
                tracing::debug!(slot, task_id = %id, elapsed = ?start.elapsed(), "Task succeeded");
            }
        }

        drop(token);
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("slot", &self.token.slot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::BoundedSlotSet;
    use std::time::Duration;

    fn setup() -> (BoundedSlotSet, Arc<FailureBucket>) {
        (
            BoundedSlotSet::new(1).unwrap(),
            Arc::new(FailureBucket::new()),
        )
    }

    #[test]
    fn successful_run_records_nothing_and_releases_slot() {
        let (slots, failures) = setup();
        let (tx, rx) = std::sync::mpsc::channel();

        let task = TaskContext::new(
            slots.acquire().unwrap(),
            Arc::clone(&failures),
            None,
            move |value: u32| {
                tx.send(value * 2).unwrap();
                Ok::<_, anyhow::Error>(())
            },
            21,
        );
        assert!(!slots.is_empty(Duration::ZERO).unwrap());

        task.run();

        assert_eq!(rx.recv().unwrap(), 42);
        assert!(failures.is_empty());
        assert!(slots.is_empty(Duration::ZERO).unwrap());
    }

    #[test]
    fn returned_error_is_captured() {
        let (slots, failures) = setup();

        let task = TaskContext::new(
            slots.acquire().unwrap(),
            Arc::clone(&failures),
            Some("decode".to_string()),
            |path: &'static str| Err(std::io::Error::other(format!("cannot open {path}"))),
            "tile.png",
        );
        let id = task.id();
        task.run();

        let captured = failures.snapshot();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].task_id(), id);
        assert_eq!(captured[0].slot(), 0);
        assert_eq!(captured[0].label(), Some("decode"));
        assert_eq!(captured[0].kind(), FailureKind::Error);
        assert_eq!(captured[0].message(), "cannot open tile.png");
        assert!(slots.is_empty(Duration::ZERO).unwrap());
    }

    #[derive(Debug)]
    struct Unprintable;

    impl std::fmt::Display for Unprintable {
        fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            panic!("display exploded")
        }
    }

    impl std::error::Error for Unprintable {}

    #[test]
    fn error_whose_display_panics_is_still_captured() {
        let (slots, failures) = setup();

        let task = TaskContext::new(
            slots.acquire().unwrap(),
            Arc::clone(&failures),
            None,
            |_: ()| Err(Unprintable),
            (),
        );
        task.run();

        let captured = failures.snapshot();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].kind(), FailureKind::Error);
        assert_eq!(
            captured[0].message(),
            "failed to render error: display exploded"
        );
        assert!(captured[0].downcast_ref::<Unprintable>().is_some());
        assert!(slots.is_empty(Duration::ZERO).unwrap());
    }

    #[test]
    fn panic_is_captured_and_slot_released() {
        let (slots, failures) = setup();

        let task = TaskContext::new(
            slots.acquire().unwrap(),
            Arc::clone(&failures),
            None,
            |_: ()| -> anyhow::Result<()> { panic!("worker blew up") },
            (),
        );
        task.run();

        let captured = failures.snapshot();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].kind(), FailureKind::Panic);
        assert_eq!(captured[0].message(), "task panicked: worker blew up");
        assert!(slots.is_empty(Duration::ZERO).unwrap());
    }

    #[test]
    fn dropping_unrun_context_releases_slot() {
        let (slots, failures) = setup();

        let task = TaskContext::new(
            slots.acquire().unwrap(),
            Arc::clone(&failures),
            None,
            |_: ()| Ok::<_, anyhow::Error>(()),
            (),
        );
        assert_eq!(slots.in_use().unwrap(), 1);

        drop(task);

        assert!(slots.is_empty(Duration::ZERO).unwrap());
        assert!(failures.is_empty());
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }
}
