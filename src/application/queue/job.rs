use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{LibraryMount, OutputFormat, Parameters, ProjectContext, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Rendering,
    Complete,
    Error,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Rendering => "rendering",
            JobState::Complete => "complete",
            JobState::Error => "error",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One export/comparison render. `result` is only ever valid for the
/// parameters and format it was rendered with; edits reset it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub id: String,
    pub name: String,
    pub parameters: Parameters,
    pub output_format: OutputFormat,
    pub state: JobState,
    pub result: Option<RenderResult>,
    pub render_time_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
}

impl RenderJob {
    pub(crate) fn new(
        id: String,
        name: String,
        parameters: Parameters,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            id,
            name,
            parameters,
            output_format,
            state: JobState::Queued,
            result: None,
            render_time_ms: None,
            error: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub(crate) fn requeue(&mut self) {
        self.state = JobState::Queued;
        self.result = None;
        self.render_time_ms = None;
        self.error = None;
    }
}

/// Model source every queued job renders against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectSource {
    pub scad_source: String,
    pub project: Option<ProjectContext>,
    pub libraries: Vec<LibraryMount>,
}

impl ProjectSource {
    pub fn new(scad_source: impl Into<String>) -> Self {
        Self {
            scad_source: scad_source.into(),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project: ProjectContext) -> Self {
        self.project = Some(project);
        self
    }

    pub fn with_libraries(mut self, libraries: Vec<LibraryMount>) -> Self {
        self.libraries = libraries;
        self
    }
}

/// Per-state counts plus accumulated render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub rendering: usize,
    pub complete: usize,
    pub error: usize,
    pub cancelled: usize,
    pub total_render_time_ms: u64,
}

impl QueueStats {
    pub(crate) fn collect<'a>(jobs: impl IntoIterator<Item = &'a RenderJob>) -> Self {
        jobs.into_iter().fold(Self::default(), |mut stats, job| {
            stats.total += 1;
            match job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Rendering => stats.rendering += 1,
                JobState::Complete => stats.complete += 1,
                JobState::Error => stats.error += 1,
                JobState::Cancelled => stats.cancelled += 1,
            }
            stats.total_render_time_ms += job.render_time_ms.unwrap_or(0);
            stats
        })
    }
}
