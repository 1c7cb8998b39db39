use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable classification shared by every error the orchestration core surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotReady,
    Busy,
    Timeout,
    Cancelled,
    RenderFailed,
    CapacityExceeded,
    NoContent,
    InvalidImport,
    NotFound,
    InvalidState,
    Terminated,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotReady => "NOT_READY",
            ErrorKind::Busy => "BUSY",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::RenderFailed => "RENDER_FAILED",
            ErrorKind::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorKind::NoContent => "NO_CONTENT",
            ErrorKind::InvalidImport => "INVALID_IMPORT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Terminated => "TERMINATED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Map an engine-reported error code onto a kind. Unknown codes are render failures.
    pub fn from_engine_code(code: &str) -> Self {
        match code {
            "NOT_READY" => ErrorKind::NotReady,
            "BUSY" => ErrorKind::Busy,
            "TIMEOUT" => ErrorKind::Timeout,
            "CANCELLED" => ErrorKind::Cancelled,
            _ => ErrorKind::RenderFailed,
        }
    }

    /// Short user-facing text for the presentation layer.
    pub fn presentation_message(self) -> &'static str {
        match self {
            ErrorKind::NotReady => "The render engine is still starting up",
            ErrorKind::Busy => "A render is already in progress",
            ErrorKind::Timeout => "Rendering took too long and was stopped",
            ErrorKind::Cancelled => "Rendering was cancelled",
            ErrorKind::RenderFailed => "The model could not be rendered",
            ErrorKind::CapacityExceeded => "The render queue is full",
            ErrorKind::NoContent => "No model source has been loaded",
            ErrorKind::InvalidImport => "The queue file could not be read",
            ErrorKind::NotFound => "The requested job does not exist",
            ErrorKind::InvalidState => "The job cannot be changed right now",
            ErrorKind::Terminated => "The render engine was shut down",
            ErrorKind::Internal => "Unexpected error occurred",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
