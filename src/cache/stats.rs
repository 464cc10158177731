//! Process-local hit/miss/error counters.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

use super::store::StoreInfo;

pub const METRIC_CACHE_HIT: &str = "storefront_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "storefront_cache_miss_total";
pub const METRIC_CACHE_ERROR: &str = "storefront_cache_error_total";
pub const METRIC_LOCK_CONTENTION: &str = "storefront_cache_lock_contention_total";
pub const METRIC_WARMUP_MS: &str = "storefront_cache_warmup_ms";

/// Running totals for the lifetime of the process, reset only by a flush.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCounters {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl StatsCounters {
    /// `hits / (hits + misses)`, zero before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_HIT).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS).increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_ERROR).increment(1);
    }

    pub fn snapshot(&self) -> StatsCounters {
        StatsCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Counters joined with what the store reports about itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub keys: u64,
    pub memory: u64,
    pub store: StoreInfo,
}

impl CacheStatsSnapshot {
    pub fn new(counters: StatsCounters, store: StoreInfo) -> Self {
        Self {
            hits: counters.hits,
            misses: counters.misses,
            errors: counters.errors,
            hit_rate: counters.hit_rate(),
            keys: store.keys,
            memory: store.memory_bytes,
            store,
        }
    }
}
