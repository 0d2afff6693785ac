//! Failures captured from background tasks.
//!
//! A [`FailureBucket`] is shared by every task spawned from one dispatcher.
//! Tasks append to it; the foreground snapshots, clears, or drains it. The
//! bucket has its own lock and is never held together with slot state.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The callback returned `Err`.
    Error,
    /// The callback panicked.
    Panic,
}

/// One failure captured from a background task.
///
/// Clones share the underlying error, so snapshots are cheap copies.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedFailure {
    task_id: TaskId,
    slot: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    kind: FailureKind,
    message: String,
    captured_at: DateTime<Utc>,
    #[serde(skip)]
    error: Arc<anyhow::Error>,
}

impl CapturedFailure {
    pub(crate) fn new(
        task_id: TaskId,
        slot: usize,
        label: Option<String>,
        kind: FailureKind,
        error: anyhow::Error,
    ) -> Self {
        Self {
            task_id,
            slot,
            label,
            kind,
            message: render_error(&error),
            captured_at: Utc::now(),
            error: Arc::new(error),
        }
    }

    pub(crate) fn from_panic(
        task_id: TaskId,
        slot: usize,
        label: Option<String>,
        payload: Box<dyn Any + Send>,
    ) -> Self {
        let message = panic_message(payload.as_ref());
        Self::new(
            task_id,
            slot,
            label,
            FailureKind::Panic,
            anyhow::anyhow!("task panicked: {message}"),
        )
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

impl std::fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label} (slot {}): {}", self.slot, self.message),
            None => write!(f, "slot {}: {}", self.slot, self.message),
        }
    }
}

impl std::error::Error for CapturedFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.error)
    }
}

/// `{error:#}`, or a fixed message if the error's `Display` panics.
fn render_error(error: &anyhow::Error) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| format!("{error:#}"))) {
        Ok(message) => message,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            format!("failed to render error: {reason}")
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Thread-safe, append-only collection of captured failures.
#[derive(Debug, Default)]
pub struct FailureBucket {
    failures: Mutex<Vec<CapturedFailure>>,
}

impl FailureBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, failure: CapturedFailure) {
        self.failures().push(failure);
    }

    /// Copy of every failure currently held. Does not clear.
    pub fn snapshot(&self) -> Vec<CapturedFailure> {
        self.failures().clone()
    }

    pub fn clear(&self) {
        self.failures().clear();
    }

    /// Empty the bucket, returning the first inserted failure (if any).
    pub fn take_first(&self) -> Option<CapturedFailure> {
        let drained = std::mem::take(&mut *self.failures());
        drained.into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.failures().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures().is_empty()
    }

    // A panic while holding this lock cannot leave the Vec half-written, so
    // poisoning is ignored rather than dropping failures on the floor.
    fn failures(&self) -> MutexGuard<'_, Vec<CapturedFailure>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
