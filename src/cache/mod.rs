//! Storefront cache layer.
//!
//! A single [`CacheManager`] fronts the shared key-value store and is handed
//! to every consumer behind an `Arc`:
//!
//! - **Manager**: namespaced keys, tag indexes, stats and the populate lock
//! - **Strategies**: cache-aside, write-through, write-behind, multi-level
//!   and time-based wrappers implementing [`Cache`]
//! - **Invalidation / warmup**: authorized bulk invalidation and batched
//!   pre-population
//! - **Middleware**: response caching and CDN cache headers for axum
//!
//! ## Configuration
//!
//! Tuning lives in the `[cache]` section:
//!
//! ```toml
//! [cache]
//! default_ttl_seconds = 3600
//! lock_ttl_seconds = 30
//! lock_max_attempts = 50
//! # ... see config.rs for all options
//! ```

mod auth;
pub mod codec;
mod config;
mod invalidation;
pub mod keys;
pub(crate) mod lock;
mod manager;
pub mod middleware;
mod source;
mod stats;
mod store;
pub mod strategy;
mod warmup;

pub use auth::{AdminGuard, AuthError};
pub use codec::CodecError;
pub use config::CacheConfig;
pub use invalidation::{
    InvalidationError, InvalidationKind, InvalidationOutcome, InvalidationRequest, Invalidator,
};
pub use manager::{CacheManager, CacheOptions};
pub use middleware::{
    CachedResponse, PageCachePolicy, ResponseCacheOptions, ResponseCacheState,
    page_cache_headers, with_cache,
};
pub use source::{DataSink, DataSource, FnSink, FnSource, SourceError, sink_fn, source_fn};
pub use stats::{
    CacheStats, CacheStatsSnapshot, METRIC_CACHE_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
    METRIC_LOCK_CONTENTION, METRIC_WARMUP_MS, StatsCounters,
};
pub use store::{KeyValueStore, StoreCommand, StoreError, StoreInfo, StoreReply};
pub use strategy::{
    Cache, CacheAside, CacheValue, ExpiryHook, FlushReport, MultiLevel, TimeBased, WriteBehind,
    WriteThrough,
};
pub use warmup::{WarmupItem, WarmupOptions, WarmupProgress, WarmupReport, Warmer};
