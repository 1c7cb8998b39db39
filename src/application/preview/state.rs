use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::{Fingerprint, RenderStats};

/// Freshness of the preview the presentation layer is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreviewState {
    #[default]
    Idle,
    /// A debounce timer or a busy-wait is outstanding.
    Pending,
    Rendering,
    /// The shown mesh matches the latest requested parameters.
    Current,
    /// A previous mesh is shown but the parameters have moved on.
    Stale,
    Error,
}

impl PreviewState {
    pub fn as_str(self) -> &'static str {
        match self {
            PreviewState::Idle => "IDLE",
            PreviewState::Pending => "PENDING",
            PreviewState::Rendering => "RENDERING",
            PreviewState::Current => "CURRENT",
            PreviewState::Stale => "STALE",
            PreviewState::Error => "ERROR",
        }
    }
}

impl fmt::Display for PreviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mesh handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewFrame {
    pub fingerprint: Fingerprint,
    pub mesh_data: Bytes,
    pub stats: RenderStats,
    /// Resolved `#rrggbb` tint, when colour overrides apply.
    pub color: Option<String>,
    pub from_cache: bool,
}
