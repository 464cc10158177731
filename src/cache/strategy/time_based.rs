use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Cache, CacheValue, cache_write_failed};
use crate::cache::lock::mutex_lock;
use crate::cache::manager::{CacheManager, CacheOptions};
use crate::cache::source::{DataSource, SourceError};

const SOURCE: &str = "cache::strategy::time_based";

/// Called with the logical key after a scheduled expiry removed it.
pub type ExpiryHook = Arc<dyn Fn(&str) + Send + Sync>;

type Timers = Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>;

/// Entries removed by an in-process timer rather than relying on store TTLs
/// alone, with an optional hook fired on each scheduled removal.
///
/// Timers live in this process; a restart forgets them and the store TTL
/// takes over.
pub struct TimeBased<S> {
    manager: Arc<CacheManager>,
    source: S,
    options: CacheOptions,
    timers: Timers,
    generation: AtomicU64,
    on_expire: Option<ExpiryHook>,
}

impl<S> TimeBased<S> {
    pub fn new(manager: Arc<CacheManager>, source: S, options: CacheOptions) -> Self {
        Self {
            manager,
            source,
            options,
            timers: Arc::default(),
            generation: AtomicU64::new(0),
            on_expire: None,
        }
    }

    pub fn with_expiry_hook(mut self, hook: ExpiryHook) -> Self {
        self.on_expire = Some(hook);
        self
    }

    /// Keys with an armed timer.
    pub fn scheduled(&self) -> usize {
        mutex_lock(&self.timers, SOURCE, "scheduled").len()
    }

    /// Write `value` and schedule its removal after `ttl`, replacing any
    /// timer already armed for `key`.
    pub async fn set_with_ttl<T: CacheValue>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), SourceError> {
        let options = CacheOptions {
            ttl: Some(ttl),
            ..self.options.clone()
        };
        if !self.manager.set(key, value, &options).await {
            return Err(cache_write_failed(key));
        }
        self.arm(key, ttl);
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.options
            .ttl
            .unwrap_or_else(|| self.manager.config().default_ttl())
    }

    fn arm(&self, key: &str, ttl: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let manager = self.manager.clone();
        let timers = self.timers.clone();
        let tags = self.options.tags.clone();
        let hook = self.on_expire.clone();
        let owned_key = key.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            manager.del(&owned_key, &tags).await;
            {
                let mut timers = mutex_lock(&timers, SOURCE, "expire");
                if timers
                    .get(&owned_key)
                    .is_some_and(|(armed, _)| *armed == generation)
                {
                    timers.remove(&owned_key);
                }
            }
            debug!(source = SOURCE, key = %owned_key, "scheduled expiry fired");
            if let Some(hook) = hook {
                hook(&owned_key);
            }
        });

        let previous =
            mutex_lock(&self.timers, SOURCE, "arm").insert(key.to_string(), (generation, handle));
        if let Some((_, previous)) = previous {
            previous.abort();
        }
    }

    fn cancel(&self, key: &str) {
        if let Some((_, handle)) = mutex_lock(&self.timers, SOURCE, "cancel").remove(key) {
            handle.abort();
        }
    }

    fn cancel_all(&self) -> Vec<String> {
        let drained: Vec<(String, (u64, JoinHandle<()>))> =
            mutex_lock(&self.timers, SOURCE, "cancel_all").drain().collect();
        drained
            .into_iter()
            .map(|(key, (_, handle))| {
                handle.abort();
                key
            })
            .collect()
    }
}

impl<S> Drop for TimeBased<S> {
    fn drop(&mut self) {
        for (_, (_, handle)) in mutex_lock(&self.timers, SOURCE, "drop").drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<T, S> Cache<T> for TimeBased<S>
where
    T: CacheValue,
    S: DataSource<T>,
{
    async fn get(&self, key: &str) -> Result<T, SourceError> {
        self.manager
            .get_or_set(key, || self.source.fetch(key), &self.options)
            .await
    }

    async fn set(&self, key: &str, value: T) -> Result<(), SourceError> {
        self.set_with_ttl(key, &value, self.ttl()).await
    }

    async fn invalidate(&self, key: Option<&str>) -> u64 {
        match key {
            Some(key) => {
                self.cancel(key);
                u64::from(self.manager.del(key, &self.options.tags).await)
            }
            None => {
                let mut removed = 0;
                for key in self.cancel_all() {
                    removed += u64::from(self.manager.del(&key, &self.options.tags).await);
                }
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
    use crate::cache::source::source_fn;
    use crate::cache::strategy::test_support::{Product, manager, product};

    fn no_source() -> impl DataSource<Product> {
        source_fn(|key: String| async move { Err::<Product, _>(SourceError::NotFound(key)) })
    }

    #[tokio::test(start_paused = true)]
    async fn timer_removes_entry_and_fires_hook() {
        let (_, manager) = manager();
        let expired = Arc::new(Mutex::new(Vec::new()));
        let log = expired.clone();
        let cache = TimeBased::new(manager.clone(), no_source(), CacheOptions::new())
            .with_expiry_hook(Arc::new(move |key: &str| {
                log.lock().expect("expiry log").push(key.to_string());
            }));

        cache
            .set_with_ttl("flash-sale", &product("Robe"), Duration::from_secs(5))
            .await
            .expect("set");
        assert_eq!(cache.scheduled(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(!manager.exists("flash-sale", &[]).await);
        assert_eq!(*expired.lock().expect("expiry log"), vec!["flash-sale".to_string()]);
        assert_eq!(cache.scheduled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_timer() {
        let (_, manager) = manager();
        let cache = TimeBased::new(manager.clone(), no_source(), CacheOptions::new());

        cache
            .set_with_ttl("banner", &product("v1"), Duration::from_secs(2))
            .await
            .expect("set");
        cache
            .set_with_ttl("banner", &product("v2"), Duration::from_secs(10))
            .await
            .expect("set");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(cache.get("banner").await.expect("still cached"), product("v2"));
        assert_eq!(cache.scheduled(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_cancels_timers() {
        let (_, manager) = manager();
        let cache = TimeBased::new(manager.clone(), no_source(), CacheOptions::new());

        cache.set("a", product("A")).await.expect("set");
        cache.set("b", product("B")).await.expect("set");
        assert_eq!(cache.scheduled(), 2);

        assert_eq!(Cache::<Product>::invalidate(&cache, None).await, 2);
        assert_eq!(cache.scheduled(), 0);
        assert!(!manager.exists("a", &[]).await);
    }
}
