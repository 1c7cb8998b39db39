use thiserror::Error;

use crate::domain::ErrorKind;

/// Failures surfaced by the engine gateway. Each rejects exactly one pending
/// future and is never retried by the gateway itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("render engine is not ready")]
    NotReady,
    #[error("render engine is busy with request `{request_id}`")]
    Busy { request_id: String },
    #[error("render timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("render was cancelled")]
    Cancelled,
    #[error("render failed ({code}): {message}")]
    RenderFailed { code: String, message: String },
    #[error("render engine was terminated")]
    Terminated,
    #[error("engine transport failed: {message}")]
    Transport { message: String },
    #[error("engine protocol violation: {message}")]
    Protocol { message: String },
}

impl EngineError {
    pub fn render_failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RenderFailed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Build the error for an engine-reported `ERROR` message.
    pub fn from_engine(code: &str, message: &str, timeout_ms: u64) -> Self {
        match ErrorKind::from_engine_code(code) {
            ErrorKind::Timeout => Self::Timeout {
                after_ms: timeout_ms,
            },
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::NotReady => Self::NotReady,
            _ => Self::render_failed(code, message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotReady => ErrorKind::NotReady,
            EngineError::Busy { .. } => ErrorKind::Busy,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::RenderFailed { .. } => ErrorKind::RenderFailed,
            EngineError::Terminated => ErrorKind::Terminated,
            EngineError::Transport { .. } | EngineError::Protocol { .. } => ErrorKind::Internal,
        }
    }

    /// Engine-supplied detail, when there is any.
    pub fn engine_message(&self) -> Option<&str> {
        match self {
            EngineError::RenderFailed { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Closed => EngineError::Terminated,
            other => EngineError::Transport {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("engine channel is closed")]
    Closed,
    #[error("failed to encode engine message: {0}")]
    Encode(String),
}

/// Inbound frames that could not be turned into a known message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown engine message type `{0}`")]
    UnknownType(String),
    #[error("malformed engine message: {0}")]
    Malformed(String),
}
