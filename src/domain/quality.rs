//! Quality presets: tessellation bounds and timeouts keyed by tier name.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params::{Parameters, number_value};

/// Tessellation count parameter (`$fn`).
pub const FN_PARAM: &str = "$fn";
/// Minimum angle parameter (`$fa`).
pub const FA_PARAM: &str = "$fa";
/// Minimum fragment size parameter (`$fs`).
pub const FS_PARAM: &str = "$fs";

const DEFAULT_PREVIEW_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_FULL_TIMEOUT_MS: u64 = 120_000;

/// Named quality tier. `Preview` and `Full` always exist in a [`QualityPresets`]
/// table; further tiers can be declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityTier {
    Preview,
    Full,
    Custom(String),
}

impl QualityTier {
    pub fn as_str(&self) -> &str {
        match self {
            QualityTier::Preview => "preview",
            QualityTier::Full => "full",
            QualityTier::Custom(name) => name.as_str(),
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "preview" => QualityTier::Preview,
            "full" => QualityTier::Full,
            other => QualityTier::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds applied to the tessellation parameters of a render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPreset {
    /// Cap on `$fn`; `None` leaves it unbounded.
    pub max_fn: Option<u32>,
    /// Floor on `$fa`.
    pub min_fa: f64,
    /// Floor on `$fs`.
    pub min_fs: f64,
    /// Inject `$fn = max_fn` when the caller did not supply one.
    pub force_fn: bool,
    /// Render deadline handed to the engine.
    pub timeout_ms: u64,
}

impl QualityPreset {
    pub fn preview() -> Self {
        Self {
            max_fn: Some(32),
            min_fa: 12.0,
            min_fs: 2.0,
            force_fn: false,
            timeout_ms: DEFAULT_PREVIEW_TIMEOUT_MS,
        }
    }

    pub fn full() -> Self {
        Self {
            max_fn: None,
            min_fa: 1.0,
            min_fs: 0.4,
            force_fn: false,
            timeout_ms: DEFAULT_FULL_TIMEOUT_MS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Preset table keyed by tier name.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityPresets {
    presets: BTreeMap<String, QualityPreset>,
}

impl QualityPresets {
    pub fn new() -> Self {
        let mut presets = BTreeMap::new();
        presets.insert(QualityTier::Preview.as_str().to_string(), QualityPreset::preview());
        presets.insert(QualityTier::Full.as_str().to_string(), QualityPreset::full());
        Self { presets }
    }

    /// Insert or replace the preset for `tier`.
    pub fn insert(&mut self, tier: QualityTier, preset: QualityPreset) {
        self.presets.insert(tier.as_str().to_string(), preset);
    }

    /// Preset for `tier`, falling back to the full preset for unknown tiers.
    pub fn get(&self, tier: &QualityTier) -> QualityPreset {
        self.presets
            .get(tier.as_str())
            .cloned()
            .unwrap_or_else(|| self.full())
    }

    pub fn contains(&self, tier: &QualityTier) -> bool {
        self.presets.contains_key(tier.as_str())
    }

    pub fn preview(&self) -> QualityPreset {
        self.presets
            .get(QualityTier::Preview.as_str())
            .cloned()
            .unwrap_or_else(QualityPreset::preview)
    }

    pub fn full(&self) -> QualityPreset {
        self.presets
            .get(QualityTier::Full.as_str())
            .cloned()
            .unwrap_or_else(QualityPreset::full)
    }

    pub fn tiers(&self) -> impl Iterator<Item = QualityTier> + '_ {
        self.presets.keys().map(|name| QualityTier::from_name(name))
    }
}

impl Default for QualityPresets {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `preset` to `parameters`.
///
/// Caller-supplied tessellation values are only replaced when they violate a
/// bound. Absent `$fa`/`$fs` are filled with the floors; an absent `$fn` is
/// only injected when `force_fn` is set and a cap exists. Non-numeric values
/// pass through untouched.
pub fn apply_quality_settings(parameters: &Parameters, preset: &QualityPreset) -> Parameters {
    let mut adjusted = parameters.clone();

    match adjusted.get(FN_PARAM).map(Value::as_f64) {
        Some(Some(value)) => {
            if let Some(max_fn) = preset.max_fn
                && value > f64::from(max_fn)
            {
                adjusted.insert(FN_PARAM.to_string(), Value::from(max_fn));
            }
        }
        Some(None) => {}
        None => {
            if preset.force_fn
                && let Some(max_fn) = preset.max_fn
            {
                adjusted.insert(FN_PARAM.to_string(), Value::from(max_fn));
            }
        }
    }

    apply_floor(&mut adjusted, FA_PARAM, preset.min_fa);
    apply_floor(&mut adjusted, FS_PARAM, preset.min_fs);

    adjusted
}

fn apply_floor(parameters: &mut Parameters, key: &str, floor: f64) {
    match parameters.get(key).map(Value::as_f64) {
        Some(Some(value)) if value >= floor => {}
        Some(None) => {}
        _ => {
            parameters.insert(key.to_string(), number_value(floor));
        }
    }
}
