use serde::Serialize;

use super::job::JobState;

/// Outcome counts of one `process_queue` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub completed: usize,
    pub failed: usize,
    /// Jobs found cancelled when their turn came.
    pub skipped: usize,
    /// True when the run ended early on request.
    pub stopped: bool,
}

/// Notifications delivered to queue subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Added { job_id: String },
    Updated { job_id: String, state: JobState },
    Removed { job_id: String },
    Cleared { removed: usize },
    ProcessingStarted { queued: usize },
    ProcessingStopped(ProcessSummary),
    ProcessingComplete(ProcessSummary),
}

impl QueueEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Added { .. } => "add",
            QueueEvent::Updated { .. } => "update",
            QueueEvent::Removed { .. } => "remove",
            QueueEvent::Cleared { .. } => "clear",
            QueueEvent::ProcessingStarted { .. } => "processing-start",
            QueueEvent::ProcessingStopped(_) => "processing-stopped",
            QueueEvent::ProcessingComplete(_) => "processing-complete",
        }
    }
}
