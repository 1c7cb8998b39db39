//! Preview cache configuration.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_CAPACITY: usize = 10;

/// Preview cache sizing, read from the `[preview]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewCacheConfig {
    /// Maximum number of preview meshes kept.
    pub capacity: usize,
}

impl Default for PreviewCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl From<&crate::config::PreviewSettings> for PreviewCacheConfig {
    fn from(settings: &crate::config::PreviewSettings) -> Self {
        Self {
            capacity: settings.cache_capacity,
        }
    }
}

impl PreviewCacheConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
