//! Batch pre-population of the cache from a source.
//!
//! Items are processed in consecutive batches of `concurrency`; a batch runs
//! concurrently and must settle before the next one starts, which bounds the
//! load put on the source.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::join_all;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::manager::{CacheManager, CacheOptions};
use super::source::{DataSource, SourceError};
use super::stats::METRIC_WARMUP_MS;
use super::strategy::CacheValue;

const SOURCE: &str = "cache::warmup";

/// `source_id` is handed to the source; the fetched value is cached under `cache_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupItem {
    pub source_id: String,
    pub cache_key: String,
}

impl WarmupItem {
    pub fn new(source_id: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            cache_key: cache_key.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WarmupOptions {
    /// Falls back to the configured warmup concurrency.
    pub concurrency: Option<NonZeroUsize>,
    pub cache: CacheOptions,
}

/// Reported after each batch settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupProgress {
    pub batch: usize,
    pub batches: usize,
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    pub warmed_up: usize,
    pub failed: usize,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct Warmer {
    manager: Arc<CacheManager>,
}

impl Warmer {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Fetch every item and cache it. Per-item failures are logged and
    /// counted; they never stop the run.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn warm<T, S, P>(
        &self,
        items: &[WarmupItem],
        source: &S,
        options: &WarmupOptions,
        mut progress: P,
    ) -> WarmupReport
    where
        T: CacheValue,
        S: DataSource<T> + ?Sized,
        P: FnMut(WarmupProgress),
    {
        let started = Instant::now();
        let concurrency = options
            .concurrency
            .unwrap_or_else(|| self.manager.config().warmup_concurrency_non_zero())
            .get();
        let batches = items.len().div_ceil(concurrency);

        let mut report = WarmupReport::default();
        for (index, batch) in items.chunks(concurrency).enumerate() {
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|item| self.warm_one(item, source, &options.cache)),
            )
            .await;

            for (item, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => report.warmed_up += 1,
                    Err(error) => {
                        report.failed += 1;
                        warn!(
                            source = SOURCE,
                            item = %item.source_id,
                            key = %item.cache_key,
                            error = %error,
                            "warmup item failed"
                        );
                    }
                }
            }

            progress(WarmupProgress {
                batch: index + 1,
                batches,
                completed: report.warmed_up + report.failed,
                total: items.len(),
                succeeded: report.warmed_up,
                failed: report.failed,
            });
        }

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        histogram!(METRIC_WARMUP_MS).record(elapsed.as_secs_f64() * 1000.0);
        info!(
            warmed_up = report.warmed_up,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "cache warmup finished"
        );
        report
    }

    async fn warm_one<T, S>(
        &self,
        item: &WarmupItem,
        source: &S,
        options: &CacheOptions,
    ) -> Result<(), SourceError>
    where
        T: CacheValue,
        S: DataSource<T> + ?Sized,
    {
        let value = source.fetch(&item.source_id).await?;
        if self.manager.set(&item.cache_key, &value, options).await {
            Ok(())
        } else {
            Err(SourceError::Unavailable(format!(
                "could not store `{}`",
                item.cache_key
            )))
        }
    }
}
