use std::error::Error as StdError;

use crate::domain::ErrorKind;

use super::preview::PreviewError;
use super::queue::QueueError;

/// Flattened view of a failure handed to whatever surface reports it: the
/// stable kind, the module that produced it and every message in the source
/// chain, outermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub source: &'static str,
    pub kind: ErrorKind,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, kind: ErrorKind, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            kind,
            messages,
        }
    }

    pub fn from_message(source: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            messages: vec![message.into()],
        }
    }

    /// User-facing sentence for the report's kind.
    pub fn presentation_message(&self) -> &'static str {
        self.kind.presentation_message()
    }
}

impl From<&PreviewError> for ErrorReport {
    fn from(error: &PreviewError) -> Self {
        Self::from_error("application::preview", error.kind(), error)
    }
}

impl From<&QueueError> for ErrorReport {
    fn from(error: &QueueError) -> Self {
        Self::from_error("application::queue", error.kind(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;

    #[test]
    fn queue_errors_report_their_kind() {
        let report = ErrorReport::from(&QueueError::CapacityExceeded { max: 20 });
        assert_eq!(report.kind, ErrorKind::CapacityExceeded);
        assert_eq!(report.source, "application::queue");
        assert_eq!(report.messages, vec!["render queue is full (20 jobs)".to_string()]);
        assert_eq!(report.presentation_message(), "The render queue is full");
    }

    #[test]
    fn engine_failures_keep_the_engine_message() {
        let error = PreviewError::from(EngineError::render_failed("COMPILE_ERROR", "unknown module"));
        let report = ErrorReport::from(&error);
        assert_eq!(report.kind, ErrorKind::RenderFailed);
        assert!(report.messages[0].contains("unknown module"));
    }
}
