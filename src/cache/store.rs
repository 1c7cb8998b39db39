//! Bounded preview mesh cache.
//!
//! Eviction is by insertion order: lookups never refresh an entry, so the
//! oldest inserted fingerprint is the first to go once capacity is reached.

use std::sync::RwLock;

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::{Fingerprint, RenderStats};
use crate::util::lock::{rw_read, rw_write};

use super::config::PreviewCacheConfig;

const SOURCE: &str = "cache::store";
const METRIC_HIT_TOTAL: &str = "tessera_preview_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "tessera_preview_cache_miss_total";
const METRIC_EVICT_TOTAL: &str = "tessera_preview_cache_evict_total";

/// A cached preview render.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewCacheEntry {
    pub fingerprint: Fingerprint,
    pub mesh_data: Bytes,
    pub stats: RenderStats,
    pub created_at: OffsetDateTime,
}

impl PreviewCacheEntry {
    pub fn new(fingerprint: Fingerprint, mesh_data: Bytes, stats: RenderStats) -> Self {
        Self {
            fingerprint,
            mesh_data,
            stats,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

pub struct PreviewCache {
    entries: RwLock<LruCache<Fingerprint, PreviewCacheEntry>>,
}

impl PreviewCache {
    pub fn new(config: &PreviewCacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<PreviewCacheEntry> {
        let entry = rw_read(&self.entries, SOURCE, "get")
            .peek(fingerprint)
            .cloned();
        match entry {
            Some(_) => counter!(METRIC_HIT_TOTAL).increment(1),
            None => counter!(METRIC_MISS_TOTAL).increment(1),
        }
        entry
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains(fingerprint)
    }

    /// Insert `entry`, returning the fingerprint evicted to make room.
    pub fn insert(&self, entry: PreviewCacheEntry) -> Option<Fingerprint> {
        let key = entry.fingerprint.clone();
        let evicted = rw_write(&self.entries, SOURCE, "insert")
            .push(key.clone(), entry)
            .map(|(evicted_key, _)| evicted_key)
            .filter(|evicted_key| *evicted_key != key);

        if let Some(evicted_key) = evicted.as_ref() {
            counter!(METRIC_EVICT_TOTAL).increment(1);
            debug!(fingerprint = %evicted_key, "Evicted preview cache entry");
        }
        evicted
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<PreviewCacheEntry> {
        rw_write(&self.entries, SOURCE, "remove").pop(fingerprint)
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        rw_read(&self.entries, SOURCE, "capacity").cap().get()
    }
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::new(&PreviewCacheConfig::default())
    }
}
