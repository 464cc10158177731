use std::sync::Arc;

use async_trait::async_trait;

use super::{Cache, CacheValue, cache_write_failed};
use crate::cache::manager::{CacheManager, CacheOptions};
use crate::cache::source::{DataSource, SourceError};

/// Lazy population with stampede protection. Writes only touch the cache.
pub struct CacheAside<S> {
    manager: Arc<CacheManager>,
    source: S,
    options: CacheOptions,
}

impl<S> CacheAside<S> {
    pub fn new(manager: Arc<CacheManager>, source: S, options: CacheOptions) -> Self {
        Self {
            manager,
            source,
            options,
        }
    }
}

#[async_trait]
impl<T, S> Cache<T> for CacheAside<S>
where
    T: CacheValue,
    S: DataSource<T>,
{
    async fn get(&self, key: &str) -> Result<T, SourceError> {
        self.manager
            .get_or_set_with_lock(key, || self.source.fetch(key), &self.options)
            .await
    }

    async fn set(&self, key: &str, value: T) -> Result<(), SourceError> {
        if self.manager.set(key, &value, &self.options).await {
            Ok(())
        } else {
            Err(cache_write_failed(key))
        }
    }

    async fn invalidate(&self, key: Option<&str>) -> u64 {
        match key {
            Some(key) => u64::from(self.manager.del(key, &self.options.tags).await),
            None => {
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
    use std::sync::Arc;

    use super::*;
    use crate::cache::source::source_fn;
    use crate::cache::strategy::test_support::{CallCounter, Product, manager, product};

    #[tokio::test]
    async fn loads_once_then_serves_from_cache() {
        let (_, manager) = manager();
        let calls = Arc::new(CallCounter::default());
        let counter = calls.clone();
        let cache = CacheAside::new(
            manager,
            source_fn(move |key: String| {
                let counter = counter.clone();
                async move {
                    counter.bump();
                    Ok::<_, SourceError>(product(&key))
                }
            }),
            CacheOptions::new().with_tags(["products"]),
        );

        assert_eq!(cache.get("robe").await.expect("load"), product("robe"));
        assert_eq!(cache.get("robe").await.expect("cached"), product("robe"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn source_errors_propagate() {
        let (_, manager) = manager();
        let cache = CacheAside::new(
            manager,
            source_fn(|key: String| async move { Err::<Product, _>(SourceError::NotFound(key)) }),
            CacheOptions::new(),
        );

        assert!(matches!(
            cache.get("ghost").await,
            Err(SourceError::NotFound(key)) if key == "ghost"
        ));
    }

    #[tokio::test]
    async fn invalidate_all_clears_configured_tags() {
        let (_, manager) = manager();
        let cache = CacheAside::new(
            manager.clone(),
            source_fn(|key: String| async move { Ok::<_, SourceError>(product(&key)) }),
            CacheOptions::new().with_tags(["products"]),
        );

        cache.set("a", product("a")).await.expect("set");
        cache.set("b", product("b")).await.expect("set");
        assert_eq!(Cache::<Product>::invalidate(&cache, Some("a")).await, 1);
        assert_eq!(Cache::<Product>::invalidate(&cache, None).await, 1);
        assert!(!manager.exists("b", &["products".to_string()]).await);
    }
}
