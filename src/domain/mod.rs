//! Value types shared by the engine gateway, the live preview driver and the
//! batch render queue.

pub mod color;
pub mod error;
pub mod params;
pub mod quality;
pub mod render;

pub use color::resolve_preview_color;
pub use error::ErrorKind;
pub use params::{Fingerprint, Parameters};
pub use quality::{QualityPreset, QualityPresets, QualityTier, apply_quality_settings};
pub use render::{
    Capabilities, LibraryMount, MemoryUsage, OutputFormat, ProjectContext, RenderOptions,
    RenderProgress, RenderQuality, RenderRequest, RenderResult, RenderStats,
};
