//! Metadata Cache Implementation
//!
//! Short-TTL cache of parsed metadata records using Moka, so hot
//! records don't re-read their sidecar on every request. A derived
//! view only: entries are invalidated on mutation and expire on their
//! own, and the sidecar stays the source of truth.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::config::StorageConfig;
use crate::meta::MetadataRecord;

/// Default TTL for cached records
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Cache of metadata records keyed by `(id, name)`
pub struct MetadataCache {
    records: Cache<(String, String), MetadataRecord>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl MetadataCache {
    /// Create a cache with the default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a cache with the TTL the engine configuration carries
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_ttl(Duration::from_secs(config.metadata_cache_ttl_secs))
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        let records = Cache::builder()
            .time_to_live(ttl)
            .name("metadata_record_cache")
            .build();

        Self {
            records,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a record from cache
    ///
    /// Returns Some(record) if found, None otherwise.
    /// Updates hit/miss counters.
    pub fn get(&self, id: &str, name: &str) -> Option<MetadataRecord> {
        match self.records.get(&(id.to_string(), name.to_string())) {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(id = id, name = name, "Cache HIT for metadata record");
                Some(record)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(id = id, name = name, "Cache MISS for metadata record");
                None
            }
        }
    }

    /// Insert a record into cache under its own `(id, name)` key
    pub fn insert(&self, record: MetadataRecord) {
        let key = (record.id.clone(), record.name.clone());
        self.records.insert(key, record);
    }

    /// Invalidate a specific record's cache entry
    ///
    /// Call this whenever the record is removed.
    pub fn invalidate(&self, id: &str, name: &str) {
        self.records
            .invalidate(&(id.to_string(), name.to_string()));
        debug!(id = id, name = name, "Invalidated cached record");
    }

    /// Clear the whole cache and reset the counters
    pub fn clear(&self) {
        self.records.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Cleared metadata cache");
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            entries = self.records.entry_count(),
            "Metadata cache metrics"
        );
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
