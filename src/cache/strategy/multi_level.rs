use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use super::{Cache, CacheValue, cache_write_failed};
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::manager::{CacheManager, CacheOptions};
use crate::cache::source::{DataSource, SourceError};

const SOURCE: &str = "cache::strategy::multi_level";

struct LocalEntry<T> {
    value: T,
    stored_at: Instant,
}

/// Bounded in-process map (L1) in front of the shared store (L2).
///
/// L1 reads use `peek` and overwrites update in place, so recency never
/// changes eviction order: the entry inserted longest ago goes first. Entries older than the configured
/// freshness window are treated as absent.
pub struct MultiLevel<T, S> {
    manager: Arc<CacheManager>,
    source: S,
    options: CacheOptions,
    local: RwLock<LruCache<String, LocalEntry<T>>>,
    freshness: Duration,
}

impl<T, S> MultiLevel<T, S>
where
    T: CacheValue,
{
    pub fn new(manager: Arc<CacheManager>, source: S, options: CacheOptions) -> Self {
        let capacity = manager.config().l1_capacity_non_zero();
        let freshness = manager.config().l1_ttl();
        Self {
            manager,
            source,
            options,
            local: RwLock::new(LruCache::new(capacity)),
            freshness,
        }
    }

    /// Drop the in-process level only; the shared store is untouched.
    pub fn clear_local(&self) {
        rw_write(&self.local, SOURCE, "clear_local").clear();
    }

    pub fn local_len(&self) -> usize {
        rw_read(&self.local, SOURCE, "local_len").len()
    }

    fn local_get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        {
            let local = rw_read(&self.local, SOURCE, "local_get");
            match local.peek(key) {
                None => return None,
                Some(entry) if now.duration_since(entry.stored_at) < self.freshness => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }
        rw_write(&self.local, SOURCE, "local_expire").pop(key);
        None
    }

    /// Overwriting a present key keeps its eviction slot.
    fn local_put(&self, key: &str, value: T) {
        let stored_at = Instant::now();
        let mut local = rw_write(&self.local, SOURCE, "local_put");
        if let Some(entry) = local.peek_mut(key) {
            entry.value = value;
            entry.stored_at = stored_at;
        } else {
            local.put(key.to_string(), LocalEntry { value, stored_at });
        }
    }

    fn local_remove(&self, key: &str) -> bool {
        rw_write(&self.local, SOURCE, "local_remove")
            .pop(key)
            .is_some()
    }
}

#[async_trait]
impl<T, S> Cache<T> for MultiLevel<T, S>
where
    T: CacheValue,
    S: DataSource<T>,
{
    async fn get(&self, key: &str) -> Result<T, SourceError> {
        if let Some(value) = self.local_get(key) {
            debug!(source = SOURCE, key, level = "l1", outcome = "hit");
            return Ok(value);
        }

        if let Some(value) = self.manager.get::<T>(key, &self.options).await {
            debug!(source = SOURCE, key, level = "l2", outcome = "hit");
            self.local_put(key, value.clone());
            return Ok(value);
        }

        let value = self.source.fetch(key).await?;
        self.manager.set(key, &value, &self.options).await;
        self.local_put(key, value.clone());
        Ok(value)
    }

    async fn set(&self, key: &str, value: T) -> Result<(), SourceError> {
        self.local_put(key, value.clone());
        if self.manager.set(key, &value, &self.options).await {
            Ok(())
        } else {
            Err(cache_write_failed(key))
        }
    }

    async fn invalidate(&self, key: Option<&str>) -> u64 {
        match key {
            Some(key) => {
                let local = self.local_remove(key);
                let shared = self.manager.del(key, &self.options.tags).await;
                u64::from(local || shared)
            }
            None => {
                self.clear_local();
                let mut removed = 0;
                for tag in &self.options.tags {
                    removed += self.manager.invalidate_tag(tag).await;
                }
                removed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::cache::source::source_fn;
    use crate::cache::strategy::test_support::{CallCounter, Product, manager, product};
    use crate::infra::store::MemoryStore;

    fn failing_source() -> impl DataSource<Product> {
        source_fn(|key: String| async move { Err::<Product, _>(SourceError::NotFound(key)) })
    }

    #[tokio::test]
    async fn l2_repopulates_l1_after_local_clear() {
        let (store, manager) = manager();
        let cache = MultiLevel::new(manager, failing_source(), CacheOptions::new());

        cache.set("robe", product("Robe")).await.expect("set");
        cache.clear_local();
        assert_eq!(cache.local_len(), 0);

        assert_eq!(cache.get("robe").await.expect("from l2"), product("Robe"));
        assert_eq!(cache.local_len(), 1);

        store.simulate_outage(true);
        assert_eq!(cache.get("robe").await.expect("from l1"), product("Robe"));
    }

    #[tokio::test]
    async fn source_populates_both_levels() {
        let (_, manager) = manager();
        let calls = Arc::new(CallCounter::default());
        let counter = calls.clone();
        let cache = MultiLevel::new(
            manager.clone(),
            source_fn(move |key: String| {
                let counter = counter.clone();
                async move {
                    counter.bump();
                    Ok::<_, SourceError>(product(&key))
                }
            }),
            CacheOptions::new(),
        );

        assert_eq!(cache.get("gown").await.expect("load"), product("gown"));
        assert!(manager.exists("gown", &[]).await);
        assert_eq!(cache.local_len(), 1);
        assert_eq!(cache.get("gown").await.expect("l1"), product("gown"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn eviction_follows_insertion_order() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(CacheManager::new(
            store.clone(),
            CacheConfig {
                l1_capacity: 2,
                ..Default::default()
            },
        ));
        let cache = MultiLevel::new(manager, failing_source(), CacheOptions::new());

        cache.set("a", product("A")).await.expect("set");
        cache.set("b", product("B")).await.expect("set");
        cache.get("a").await.expect("read a");
        cache.set("c", product("C")).await.expect("set");

        store.simulate_outage(true);
        assert!(cache.get("a").await.is_err());
        assert_eq!(cache.get("b").await.expect("b"), product("B"));
        assert_eq!(cache.get("c").await.expect("c"), product("C"));
    }

    #[tokio::test]
    async fn overwriting_keeps_the_original_eviction_slot() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(CacheManager::new(
            store.clone(),
            CacheConfig {
                l1_capacity: 2,
                ..Default::default()
            },
        ));
        let cache = MultiLevel::new(manager, failing_source(), CacheOptions::new());

        cache.set("a", product("A")).await.expect("set");
        cache.set("b", product("B")).await.expect("set");
        cache.set("a", product("A2")).await.expect("overwrite");
        cache.set("c", product("C")).await.expect("set");

        store.simulate_outage(true);
        assert!(cache.get("a").await.is_err());
        assert_eq!(cache.get("b").await.expect("b"), product("B"));
        assert_eq!(cache.local_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_local_entries_fall_through() {
        let (store, manager) = manager();
        let cache = MultiLevel::new(manager, failing_source(), CacheOptions::new());

        cache.set("robe", product("Robe")).await.expect("set");
        tokio::time::advance(Duration::from_secs(61)).await;
        store.simulate_outage(true);

        assert!(cache.get("robe").await.is_err());
        assert_eq!(cache.local_len(), 0);
    }

    #[tokio::test]
    async fn invalidate_clears_both_levels() {
        let (_, manager) = manager();
        let cache = MultiLevel::new(manager.clone(), failing_source(), CacheOptions::new());

        cache.set("robe", product("Robe")).await.expect("set");
        assert_eq!(Cache::<Product>::invalidate(&cache, Some("robe")).await, 1);

        assert_eq!(cache.local_len(), 0);
        assert!(!manager.exists("robe", &[]).await);
    }
}
