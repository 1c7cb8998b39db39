use thiserror::Error;

use crate::domain::ErrorKind;
use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("render queue is full ({max} jobs)")]
    CapacityExceeded { max: usize },
    #[error("no project source has been set")]
    NoContent,
    #[error("invalid queue snapshot: {message}")]
    InvalidImport { message: String },
    #[error("job `{id}` is rendering")]
    JobRendering { id: String },
    #[error("job `{id}` does not exist")]
    JobNotFound { id: String },
    #[error("queue is already processing")]
    AlreadyProcessing,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl QueueError {
    pub fn invalid_import(message: impl Into<String>) -> Self {
        Self::InvalidImport {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            QueueError::NoContent => ErrorKind::NoContent,
            QueueError::InvalidImport { .. } => ErrorKind::InvalidImport,
            QueueError::JobRendering { .. } | QueueError::AlreadyProcessing => {
                ErrorKind::InvalidState
            }
            QueueError::JobNotFound { .. } => ErrorKind::NotFound,
            QueueError::Engine(err) => err.kind(),
        }
    }
}
