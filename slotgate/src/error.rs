use thiserror::Error;

use crate::failure::CapturedFailure;

#[derive(Debug, Error)]
pub enum Error {
    /// Capacity outside `1..=64` was requested.
    #[error("max concurrency must be between 1 and 64, got {capacity}")]
    Configuration { capacity: usize },

    /// An environment override could not be parsed.
    #[error("invalid value for {key}: {message}")]
    Config { key: &'static str, message: String },

    /// The signal set backing the slots could not be waited on.
    #[error("wait on slot signals failed: {message}")]
    Wait { message: String },

    /// The execution facility refused the task. Its slot has already been released.
    #[error("execution facility rejected task: {0}")]
    Spawn(#[source] std::io::Error),

    /// A failure captured from a background task, surfaced by the drain family.
    #[error("background task failed: {0}")]
    WorkerFailure(#[source] CapturedFailure),
}

impl Error {
    pub fn wait(message: impl Into<String>) -> Self {
        Self::Wait {
            message: message.into(),
        }
    }

    pub fn config(key: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            key,
            message: message.into(),
        }
    }

    /// The captured failure, if this is a [`Error::WorkerFailure`].
    pub fn worker_failure(&self) -> Option<&CapturedFailure> {
        match self {
            Self::WorkerFailure(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn into_worker_failure(self) -> Option<CapturedFailure> {
        match self {
            Self::WorkerFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
