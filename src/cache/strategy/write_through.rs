use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Cache, CacheValue};
use crate::cache::manager::{CacheManager, CacheOptions};
use crate::cache::source::{DataSink, DataSource, SourceError};

const SOURCE: &str = "cache::strategy::write_through";

/// Writes go to the sink and the cache together.
///
/// When the sink rejects a write the cached entry is removed, so a reader
/// never sees a value the system of record refused.
pub struct WriteThrough<So, Si> {
    manager: Arc<CacheManager>,
    source: So,
    sink: Si,
    options: CacheOptions,
}

impl<So, Si> WriteThrough<So, Si> {
    pub fn new(manager: Arc<CacheManager>, source: So, sink: Si, options: CacheOptions) -> Self {
        Self {
            manager,
            source,
            sink,
            options,
        }
    }
}

#[async_trait]
impl<T, So, Si> Cache<T> for WriteThrough<So, Si>
where
    T: CacheValue,
    So: DataSource<T>,
    Si: DataSink<T>,
{
    async fn get(&self, key: &str) -> Result<T, SourceError> {
        self.manager
            .get_or_set(key, || self.source.fetch(key), &self.options)
            .await
    }

    async fn set(&self, key: &str, value: T) -> Result<(), SourceError> {
        let (written, cached) = tokio::join!(
            self.sink.write(key, &value),
            self.manager.set(key, &value, &self.options),
        );

        if let Err(error) = written {
            self.manager.del(key, &self.options.tags).await;
            warn!(source = SOURCE, key, error = %error, "sink rejected write; cache entry dropped");
            return Err(error);
        }
        if !cached {
            debug!(source = SOURCE, key, "cache write failed; sink holds the value");
        }
        Ok(())
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
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::cache::source::{sink_fn, source_fn};
    use crate::cache::strategy::test_support::{Product, manager, product};

    #[tokio::test]
    async fn set_writes_sink_and_cache() {
        let (_, manager) = manager();
        let written = Arc::new(Mutex::new(HashMap::new()));
        let sink_log = written.clone();
        let cache = WriteThrough::new(
            manager.clone(),
            source_fn(|key: String| async move { Err::<Product, _>(SourceError::NotFound(key)) }),
            sink_fn(move |key: String, value: Product| {
                let sink_log = sink_log.clone();
                async move {
                    sink_log.lock().expect("sink log").insert(key, value);
                    Ok::<_, SourceError>(())
                }
            }),
            CacheOptions::new(),
        );

        cache.set("robe", product("Robe")).await.expect("write");

        assert_eq!(
            written.lock().expect("sink log").get("robe"),
            Some(&product("Robe"))
        );
        assert_eq!(cache.get("robe").await.expect("cached"), product("Robe"));
    }

    #[tokio::test]
    async fn sink_failure_drops_cached_value_and_returns_error() {
        let (_, manager) = manager();
        let cache = WriteThrough::new(
            manager.clone(),
            source_fn(|key: String| async move { Err::<Product, _>(SourceError::NotFound(key)) }),
            sink_fn(|_key: String, _value: Product| async move {
                Err(SourceError::failed("database rejected update"))
            }),
            CacheOptions::new(),
        );
        assert!(
            manager
                .set("robe", &product("Old"), &CacheOptions::new())
                .await
        );

        let error = cache.set("robe", product("New")).await.unwrap_err();

        assert_eq!(error.to_string(), "source call failed: database rejected update");
        assert!(!manager.exists("robe", &[]).await);
    }
}
