//! Batch render queue: ordered export jobs rendered one at a time at full quality.

mod error;
mod events;
mod job;
mod service;
mod snapshot;

pub use error::QueueError;
pub use events::{ProcessSummary, QueueEvent};
pub use job::{JobState, ProjectSource, QueueStats, RenderJob};
pub use service::{BatchRenderQueue, QueueConfig};
pub use snapshot::{JobSnapshot, QueueSnapshot, SNAPSHOT_VERSION};
