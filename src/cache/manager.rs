//! Shared entry point for every cache read and write.
//!
//! The manager owns key naming, tag indexing, payload encoding and the
//! stampede lock. Store failures never escape: reads degrade to a miss and
//! writes report `false`, with the error counter bumped either way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::codec::{self, CodecError};
use super::config::CacheConfig;
use super::keys::{lock_key, namespaced_pattern, normalize_tags, physical_key, tag_index_key};
use super::stats::{CacheStats, CacheStatsSnapshot, METRIC_LOCK_CONTENTION};
use super::store::{KeyValueStore, StoreCommand, StoreError, StoreReply};

const SOURCE: &str = "cache::manager";

/// Per-call options. The TTL falls back to the configured default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub compress: bool,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    stats: CacheStats,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Encode `value` as JSON and store it. Returns `false` on any failure.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &CacheOptions,
    ) -> bool {
        match codec::encode_json(value) {
            Ok(payload) => self.write(key, payload, options).await,
            Err(error) => {
                self.stats.record_error();
                warn!(source = SOURCE, key, error = %error, "failed to encode cache value");
                false
            }
        }
    }

    /// Store `value` verbatim, without JSON encoding.
    pub async fn set_raw(&self, key: &str, value: &str, options: &CacheOptions) -> bool {
        self.write(key, value.to_string(), options).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, options: &CacheOptions) -> Option<T> {
        self.lookup(key, options, |payload| codec::decode_json(&payload))
            .await
    }

    pub async fn get_raw(&self, key: &str, options: &CacheOptions) -> Option<String> {
        self.lookup(key, options, Ok).await
    }

    /// Delete one entry. Tag indexes keep a dangling reference until the tag
    /// is invalidated or the index expires.
    pub async fn del(&self, key: &str, tags: &[String]) -> bool {
        let physical = physical_key(key, tags);
        match self.store.del(&[physical.clone()]).await {
            Ok(removed) => removed > 0,
            Err(error) => {
                self.record_store_error("del", &physical, &error);
                false
            }
        }
    }

    /// Delete every entry indexed under `tag`, then the index itself.
    ///
    /// Returns how many entries were removed. The index is deleted even if
    /// member deletion fails.
    #[instrument(skip(self))]
    pub async fn invalidate_tag(&self, tag: &str) -> u64 {
        let index = tag_index_key(tag);
        let members = match self.store.set_members(&index).await {
            Ok(members) => members,
            Err(error) => {
                self.record_store_error("set_members", &index, &error);
                return 0;
            }
        };
        if members.is_empty() {
            return 0;
        }

        let removed = self.delete_in_batches(&members).await;

        if let Err(error) = self.store.del(&[index.clone()]).await {
            self.record_store_error("del", &index, &error);
        }
        debug!(source = SOURCE, tag, removed, "invalidated tag");
        removed
    }

    /// Delete every cache entry whose physical key matches `pattern`.
    ///
    /// Patterns are scoped to the cache namespace, so `product:*` and
    /// `cache:product:*` are equivalent.
    #[instrument(skip(self))]
    pub async fn delete_matching(&self, pattern: &str) -> u64 {
        let pattern = namespaced_pattern(pattern);
        let keys = match self.store.scan(&pattern).await {
            Ok(keys) => keys,
            Err(error) => {
                self.record_store_error("scan", &pattern, &error);
                return 0;
            }
        };
        self.delete_in_batches(&keys).await
    }

    /// Read-through: on a miss, call `fetcher`, cache its value and return it.
    ///
    /// A fetcher error is returned unchanged and nothing is cached.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: &CacheOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key, options).await {
            return Ok(cached);
        }
        self.fetch_and_store(key, fetcher, options).await
    }

    /// Read-through with single-flight population across processes.
    ///
    /// The caller that creates the lock entry fetches; everyone else backs
    /// off and re-checks. After `lock_max_attempts` rounds, or when the lock
    /// cannot be taken because the store fails, the caller fetches directly.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_or_set_with_lock<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: &CacheOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lock = lock_key(&physical_key(key, &options.tags));
        let token = Uuid::new_v4().to_string();
        let attempts = self.config.lock_max_attempts();

        for attempt in 1..=attempts {
            if let Some(cached) = self.get(key, options).await {
                return Ok(cached);
            }

            match self
                .store
                .set_if_absent(&lock, &token, self.config.lock_ttl())
                .await
            {
                Ok(true) => {
                    if let Some(cached) = self.get(key, options).await {
                        self.release_lock(&lock, &token).await;
                        return Ok(cached);
                    }
                    let outcome = self.fetch_and_store(key, fetcher, options).await;
                    self.release_lock(&lock, &token).await;
                    return outcome;
                }
                Ok(false) => {
                    counter!(METRIC_LOCK_CONTENTION).increment(1);
                    debug!(source = SOURCE, attempt, "populate lock held elsewhere");
                    tokio::time::sleep(self.lock_backoff()).await;
                }
                Err(error) => {
                    self.record_store_error("set_if_absent", &lock, &error);
                    break;
                }
            }
        }

        warn!(
            source = SOURCE,
            key,
            attempts,
            "populate lock unavailable; fetching without it"
        );
        self.fetch_and_store(key, fetcher, options).await
    }

    /// Reset the TTL of an existing entry. Tag indexes are extended to cover
    /// the new lifetime.
    pub async fn touch(&self, key: &str, ttl: Duration, tags: &[String]) -> bool {
        let tags = normalize_tags(tags);
        let physical = physical_key(key, &tags);
        match self.store.expire(&physical, ttl).await {
            Ok(true) => self.index(&physical, &tags, ttl).await,
            Ok(false) => false,
            Err(error) => {
                self.record_store_error("expire", &physical, &error);
                false
            }
        }
    }

    /// Existence check that does not count as a lookup.
    pub async fn exists(&self, key: &str, tags: &[String]) -> bool {
        let physical = physical_key(key, tags);
        match self.store.exists(&physical).await {
            Ok(found) => found,
            Err(error) => {
                self.record_store_error("exists", &physical, &error);
                false
            }
        }
    }

    /// Clear the whole store and reset the counters.
    pub async fn flush(&self) -> bool {
        match self.store.flush_all().await {
            Ok(()) => {
                self.stats.reset();
                true
            }
            Err(error) => {
                self.record_store_error("flush_all", "*", &error);
                false
            }
        }
    }

    /// Counters plus store figures. Store figures are zero when it cannot be reached.
    pub async fn stats(&self) -> CacheStatsSnapshot {
        let info = self.store.info().await.unwrap_or_else(|error| {
            warn!(source = SOURCE, error = %error, "store info unavailable");
            Default::default()
        });
        CacheStatsSnapshot::new(self.stats.snapshot(), info)
    }

    /// Send a batch of raw commands to the store in one round-trip.
    pub async fn pipeline(
        &self,
        commands: Vec<StoreCommand>,
    ) -> Result<Vec<StoreReply>, StoreError> {
        self.store.pipeline(commands).await
    }

    async fn fetch_and_store<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: &CacheOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = fetcher().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    async fn write(&self, key: &str, payload: String, options: &CacheOptions) -> bool {
        let tags = normalize_tags(&options.tags);
        let physical = physical_key(key, &tags);
        let ttl = options.ttl.unwrap_or_else(|| self.config.default_ttl());
        let payload = if options.compress {
            codec::compress(payload, self.config.compress_threshold)
        } else {
            payload
        };

        if let Err(error) = self.store.set(&physical, &payload, ttl).await {
            self.record_store_error("set", &physical, &error);
            return false;
        }
        self.index(&physical, &tags, ttl).await
    }

    async fn index(&self, physical: &str, tags: &[String], ttl: Duration) -> bool {
        if tags.is_empty() {
            return true;
        }
        // A non-expiring entry needs a non-expiring index.
        let index_ttl = if ttl.is_zero() {
            Duration::ZERO
        } else {
            ttl + self.config.tag_ttl_extension()
        };
        let commands = tags
            .iter()
            .map(|tag| StoreCommand::IndexAdd {
                key: tag_index_key(tag),
                member: physical.to_string(),
                ttl: index_ttl,
            })
            .collect();

        match self.store.pipeline(commands).await {
            Ok(_) => true,
            Err(error) => {
                self.record_store_error("pipeline", physical, &error);
                false
            }
        }
    }

    async fn lookup<T, D>(&self, key: &str, options: &CacheOptions, decode: D) -> Option<T>
    where
        D: FnOnce(String) -> Result<T, CodecError>,
    {
        let physical = physical_key(key, &options.tags);
        let stored = match self.store.get(&physical).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                self.stats.record_miss();
                debug!(source = SOURCE, key = %physical, outcome = "miss");
                return None;
            }
            Err(error) => {
                self.record_store_error("get", &physical, &error);
                self.stats.record_miss();
                return None;
            }
        };

        let decoded = if options.compress {
            codec::decompress(stored)
        } else {
            Ok(stored)
        }
        .and_then(decode);

        match decoded {
            Ok(value) => {
                self.stats.record_hit();
                debug!(source = SOURCE, key = %physical, outcome = "hit");
                Some(value)
            }
            Err(error) => {
                self.stats.record_error();
                self.stats.record_miss();
                warn!(
                    source = SOURCE,
                    key = %physical,
                    error = %error,
                    "discarding undecodable cache entry"
                );
                None
            }
        }
    }

    async fn delete_in_batches(&self, keys: &[String]) -> u64 {
        let mut removed = 0;
        for chunk in keys.chunks(self.config.pattern_batch_size_non_zero().get()) {
            match self.store.del(chunk).await {
                Ok(count) => removed += count,
                Err(error) => self.record_store_error("del", &chunk[0], &error),
            }
        }
        removed
    }

    /// Delete the lock only while it still carries our token; after it
    /// expired it may belong to another caller.
    async fn release_lock(&self, lock: &str, token: &str) {
        match self.store.del_if_equals(lock, token).await {
            Ok(true) => {}
            Ok(false) => debug!(source = SOURCE, lock, "populate lock expired before release"),
            Err(error) => self.record_store_error("del_if_equals", lock, &error),
        }
    }

    fn lock_backoff(&self) -> Duration {
        let (low, high) = self.config.lock_retry_window_ms();
        Duration::from_millis(rand::rng().random_range(low..=high))
    }

    fn record_store_error(&self, op: &'static str, key: &str, error: &StoreError) {
        self.stats.record_error();
        warn!(
            source = SOURCE,
            store = self.store.name(),
            op,
            key,
            error = %error,
            "cache store command failed"
        );
    }
}
