//! Versioned queue export format.
//!
//! ```json
//! { "version": 1, "timestamp": "2024-05-01T12:00:00Z",
//!   "jobs": [{ "id": "...", "name": "Job 1", "parameters": {}, "outputFormat": "stl", "state": "queued" }] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::domain::{OutputFormat, Parameters};

use super::error::QueueError;
use super::job::{JobState, RenderJob};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub jobs: Vec<JobSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub output_format: OutputFormat,
    pub state: JobState,
}

impl From<&RenderJob> for JobSnapshot {
    fn from(job: &RenderJob) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            parameters: job.parameters.clone(),
            output_format: job.output_format,
            state: job.state,
        }
    }
}

impl QueueSnapshot {
    pub fn capture<'a>(jobs: impl IntoIterator<Item = &'a RenderJob>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: OffsetDateTime::now_utc(),
            jobs: jobs.into_iter().map(JobSnapshot::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse exported queue data. Only the `jobs` array is mandatory; a
    /// missing version is read as the current one.
    pub fn parse(data: &str) -> Result<Self, QueueError> {
        let value: Value = serde_json::from_str(data)
            .map_err(|err| QueueError::invalid_import(format!("not valid JSON: {err}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, QueueError> {
        let Value::Object(mut root) = value else {
            return Err(QueueError::invalid_import("expected a JSON object"));
        };

        let version = match root.get("version") {
            None | Some(Value::Null) => SNAPSHOT_VERSION,
            Some(raw) => raw
                .as_u64()
                .and_then(|version| u32::try_from(version).ok())
                .ok_or_else(|| QueueError::invalid_import("`version` must be a positive integer"))?,
        };
        if version > SNAPSHOT_VERSION {
            return Err(QueueError::invalid_import(format!(
                "unsupported snapshot version {version}"
            )));
        }

        let timestamp = root
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| {
                OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
            })
            .unwrap_or_else(OffsetDateTime::now_utc);

        let jobs = match root.remove("jobs") {
            Some(Value::Array(jobs)) => jobs,
            Some(_) => return Err(QueueError::invalid_import("`jobs` must be an array")),
            None => return Err(QueueError::invalid_import("missing `jobs` array")),
        };

        let jobs = jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| {
                serde_json::from_value::<JobSnapshot>(job)
                    .map_err(|err| QueueError::invalid_import(format!("job {index}: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version,
            timestamp,
            jobs,
        })
    }
}
