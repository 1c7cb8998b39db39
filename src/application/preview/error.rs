use thiserror::Error;

use crate::domain::ErrorKind;
use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreviewError {
    #[error("no model source has been set")]
    NoContent,
    #[error(transparent)]
    Present(#[from] PresentError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl PreviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreviewError::NoContent => ErrorKind::NoContent,
            PreviewError::Present(_) => ErrorKind::Internal,
            PreviewError::Engine(err) => err.kind(),
        }
    }
}

/// The presentation layer could not load a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to present preview: {0}")]
pub struct PresentError(pub String);
