use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::params::Parameters;
use super::quality::{QualityPreset, QualityTier};

/// Mesh/export format requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Stl,
    Off,
    Amf,
    #[serde(rename = "3mf")]
    ThreeMf,
    Obj,
    Svg,
    Dxf,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Stl => "stl",
            OutputFormat::Off => "off",
            OutputFormat::Amf => "amf",
            OutputFormat::ThreeMf => "3mf",
            OutputFormat::Obj => "obj",
            OutputFormat::Svg => "svg",
            OutputFormat::Dxf => "dxf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library made available to the engine under `mount_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryMount {
    pub id: String,
    pub mount_path: String,
}

/// Multi-file project handed to the engine alongside the main source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectContext {
    /// `path -> text` for every file in the project.
    pub files: BTreeMap<String, String>,
    /// Path of the entry file within `files`.
    pub main_file: Option<String>,
}

/// Per-call render options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderOptions {
    pub output_format: OutputFormat,
    pub quality: RenderQuality,
    /// Overrides the preset's timeout when set.
    pub timeout: Option<Duration>,
    pub project: Option<ProjectContext>,
    pub libraries: Vec<LibraryMount>,
}

impl RenderOptions {
    pub fn preview() -> Self {
        Self {
            quality: RenderQuality::Tier(QualityTier::Preview),
            ..Default::default()
        }
    }

    pub fn full(output_format: OutputFormat) -> Self {
        Self {
            output_format,
            quality: RenderQuality::Tier(QualityTier::Full),
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project: Option<ProjectContext>) -> Self {
        self.project = project;
        self
    }

    pub fn with_libraries(mut self, libraries: Vec<LibraryMount>) -> Self {
        self.libraries = libraries;
        self
    }
}

/// Which preset a render runs under.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderQuality {
    /// Look the preset up in the gateway's preset table.
    Tier(QualityTier),
    /// Use an explicit preset, labelled with the tier it replaces.
    Preset {
        tier: QualityTier,
        preset: QualityPreset,
    },
}

impl RenderQuality {
    pub fn tier(&self) -> &QualityTier {
        match self {
            RenderQuality::Tier(tier) => tier,
            RenderQuality::Preset { tier, .. } => tier,
        }
    }
}

impl Default for RenderQuality {
    fn default() -> Self {
        RenderQuality::Tier(QualityTier::Full)
    }
}

/// A single render attempt, owned by the gateway until it settles.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub id: String,
    pub scad_source: String,
    pub parameters: Parameters,
    pub output_format: OutputFormat,
    pub timeout: Duration,
    pub quality: QualityTier,
    pub project: Option<ProjectContext>,
    pub libraries: Vec<LibraryMount>,
}

/// Statistics reported by the engine with a finished mesh.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    #[serde(default)]
    pub triangle_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_time_ms: Option<u64>,
    /// Engine-specific extras kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Finished render. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub request_id: String,
    pub mesh_data: Bytes,
    pub stats: RenderStats,
}

/// Capability record reported once by the engine at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    /// False until the engine has reported readiness.
    pub available: bool,
    pub version: Option<String>,
    pub has_manifold: bool,
    pub binary_export: bool,
    pub formats: Vec<OutputFormat>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            available: false,
            version: None,
            has_manifold: false,
            binary_export: false,
            formats: Vec::new(),
        }
    }
}

/// Engine memory report.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub used_mb: f64,
    pub limit_mb: f64,
    pub percent: f64,
    pub available: bool,
}

impl MemoryUsage {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Progress notification for an in-flight render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProgress {
    pub request_id: String,
    pub percent: f64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn output_format_uses_extension_names() {
        assert_eq!(serde_json::to_value(OutputFormat::ThreeMf).unwrap(), json!("3mf"));
        assert_eq!(
            serde_json::from_value::<OutputFormat>(json!("stl")).unwrap(),
            OutputFormat::Stl
        );
    }

    #[test]
    fn capabilities_default_to_unavailable() {
        let caps: Capabilities = serde_json::from_value(json!({"version": "2025.01"})).unwrap();
        assert!(!caps.available);
        assert_eq!(caps.version.as_deref(), Some("2025.01"));
    }

    #[test]
    fn stats_keep_unknown_fields() {
        let stats: RenderStats =
            serde_json::from_value(json!({"triangleCount": 12, "genus": 0})).unwrap();
        assert_eq!(stats.triangle_count, 12);
        assert_eq!(stats.extra.get("genus"), Some(&json!(0)));
    }

    #[test]
    fn render_options_pick_tiers() {
        assert_eq!(RenderOptions::preview().quality.tier(), &QualityTier::Preview);
        let full = RenderOptions::full(OutputFormat::Off);
        assert_eq!(full.quality.tier(), &QualityTier::Full);
        assert_eq!(full.output_format, OutputFormat::Off);
    }
}
