use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{Cache, CacheValue};
use crate::cache::lock::mutex_lock;
use crate::cache::manager::{CacheManager, CacheOptions};
use crate::cache::source::{DataSink, DataSource, SourceError};

const SOURCE: &str = "cache::strategy::write_behind";

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub written: usize,
    pub requeued: usize,
}

struct Shared<T, So, Si> {
    manager: Arc<CacheManager>,
    source: So,
    sink: Si,
    options: CacheOptions,
    pending: Mutex<HashMap<String, T>>,
    /// Held for a whole flush cycle so an older drained value can never
    /// reach the sink after a newer one.
    flushing: AsyncMutex<()>,
}

impl<T, So, Si> Shared<T, So, Si>
where
    T: CacheValue,
    So: DataSource<T>,
    Si: DataSink<T>,
{
    fn buffered(&self, key: &str) -> Option<T> {
        mutex_lock(&self.pending, SOURCE, "buffered")
            .get(key)
            .cloned()
    }

    async fn flush(&self) -> FlushReport {
        let _cycle = self.flushing.lock().await;
        let batch = std::mem::take(&mut *mutex_lock(&self.pending, SOURCE, "flush_drain"));
        if batch.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport::default();
        for (key, value) in batch {
            match self.sink.write(&key, &value).await {
                Ok(()) => report.written += 1,
                Err(error) => {
                    warn!(source = SOURCE, key = %key, error = %error, "deferred write failed; requeueing");
                    // A newer value buffered during this cycle wins over the failed one.
                    mutex_lock(&self.pending, SOURCE, "flush_requeue")
                        .entry(key)
                        .or_insert(value);
                    report.requeued += 1;
                }
            }
        }
        debug!(
            source = SOURCE,
            written = report.written,
            requeued = report.requeued,
            "write-behind flush finished"
        );
        report
    }
}

/// Writes land in the cache immediately and reach the sink on a timer.
///
/// Requires a tokio runtime at construction. Call [`WriteBehind::shutdown`]
/// to stop the timer and push the last buffered writes; dropping the value
/// only stops the timer.
pub struct WriteBehind<T, So, Si> {
    shared: Arc<Shared<T, So, Si>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
}

impl<T, So, Si> WriteBehind<T, So, Si>
where
    T: CacheValue,
    So: DataSource<T> + 'static,
    Si: DataSink<T> + 'static,
{
    pub fn new(manager: Arc<CacheManager>, source: So, sink: Si, options: CacheOptions) -> Self {
        let period = manager.config().write_behind_flush_interval();
        let shared = Arc::new(Shared {
            manager,
            source,
            sink,
            options,
            pending: Mutex::new(HashMap::new()),
            flushing: AsyncMutex::new(()),
        });
        let (stop, mut stopped) = watch::channel(false);

        let worker = shared.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        worker.flush().await;
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        Self {
            shared,
            timer: Mutex::new(Some(timer)),
            stop,
        }
    }

    /// Run a flush cycle now.
    pub async fn flush(&self) -> FlushReport {
        self.shared.flush().await
    }

    /// Number of writes waiting for the sink.
    pub fn pending_len(&self) -> usize {
        mutex_lock(&self.shared.pending, SOURCE, "pending_len").len()
    }

    /// Stop the timer, then flush what is still buffered.
    pub async fn shutdown(&self) -> FlushReport {
        let _ = self.stop.send(true);
        let timer = mutex_lock(&self.timer, SOURCE, "shutdown").take();
        if let Some(timer) = timer {
            if let Err(error) = timer.await {
                warn!(source = SOURCE, error = %error, "write-behind timer ended abnormally");
            }
        }
        let report = self.shared.flush().await;
        info!(
            source = SOURCE,
            written = report.written,
            requeued = report.requeued,
            "write-behind stopped"
        );
        report
    }
}

impl<T, So, Si> Drop for WriteBehind<T, So, Si> {
    fn drop(&mut self) {
        if let Some(timer) = mutex_lock(&self.timer, SOURCE, "drop").take() {
            timer.abort();
        }
    }
}

#[async_trait]
impl<T, So, Si> Cache<T> for WriteBehind<T, So, Si>
where
    T: CacheValue,
    So: DataSource<T> + 'static,
    Si: DataSink<T> + 'static,
{
    async fn get(&self, key: &str) -> Result<T, SourceError> {
        if let Some(value) = self.shared.buffered(key) {
            return Ok(value);
        }
        let shared = &self.shared;
        shared
            .manager
            .get_or_set(key, || shared.source.fetch(key), &shared.options)
            .await
    }

    async fn set(&self, key: &str, value: T) -> Result<(), SourceError> {
        if !self
            .shared
            .manager
            .set(key, &value, &self.shared.options)
            .await
        {
            debug!(source = SOURCE, key, "cache write failed; value kept in buffer");
        }
        mutex_lock(&self.shared.pending, SOURCE, "set").insert(key.to_string(), value);
        Ok(())
    }

    async fn invalidate(&self, key: Option<&str>) -> u64 {
        let shared = &self.shared;
        match key {
            Some(key) => u64::from(shared.manager.del(key, &shared.options.tags).await),
            None => {
                let mut removed = 0;
                for tag in &shared.options.tags {
                    removed += shared.manager.invalidate_tag(tag).await;
                }
                removed
            }
        }
    }
}
