//! Cache tuning knobs, resolved from the `[cache]` section of the settings.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_SECONDS: u64 = 3600;
const DEFAULT_TAG_TTL_EXTENSION_SECONDS: u64 = 3600;
const DEFAULT_COMPRESS_THRESHOLD: usize = 1000;
const DEFAULT_LOCK_TTL_SECONDS: u64 = 30;
const DEFAULT_LOCK_RETRY_MIN_MS: u64 = 100;
const DEFAULT_LOCK_RETRY_MAX_MS: u64 = 300;
const DEFAULT_LOCK_MAX_ATTEMPTS: u32 = 50;
const DEFAULT_PATTERN_BATCH_SIZE: usize = 100;
const DEFAULT_WRITE_BEHIND_FLUSH_MS: u64 = 5000;
const DEFAULT_L1_CAPACITY: usize = 1000;
const DEFAULT_L1_TTL_SECONDS: u64 = 60;
const DEFAULT_WARMUP_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a call does not supply one.
    pub default_ttl_seconds: u64,
    /// How much longer a tag index lives than the entries it indexes.
    pub tag_ttl_extension_seconds: u64,
    /// Payloads longer than this many characters are wrapped when compression is requested.
    pub compress_threshold: usize,
    /// Lease of the populate lock.
    pub lock_ttl_seconds: u64,
    /// Lower bound of the randomized back-off after losing the populate lock.
    pub lock_retry_min_ms: u64,
    /// Upper bound of the randomized back-off after losing the populate lock.
    pub lock_retry_max_ms: u64,
    /// Lock rounds before a caller gives up waiting and fetches directly.
    pub lock_max_attempts: u32,
    /// Keys deleted per round-trip during pattern invalidation.
    pub pattern_batch_size: usize,
    /// Write-behind flush cadence (ms).
    pub write_behind_flush_ms: u64,
    /// Maximum entries held in a multi-level L1 map.
    pub l1_capacity: usize,
    /// Freshness window of L1 entries.
    pub l1_ttl_seconds: u64,
    /// Items warmed concurrently per batch when a request does not say.
    pub warmup_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            tag_ttl_extension_seconds: DEFAULT_TAG_TTL_EXTENSION_SECONDS,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
            lock_ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
            lock_retry_min_ms: DEFAULT_LOCK_RETRY_MIN_MS,
            lock_retry_max_ms: DEFAULT_LOCK_RETRY_MAX_MS,
            lock_max_attempts: DEFAULT_LOCK_MAX_ATTEMPTS,
            pattern_batch_size: DEFAULT_PATTERN_BATCH_SIZE,
            write_behind_flush_ms: DEFAULT_WRITE_BEHIND_FLUSH_MS,
            l1_capacity: DEFAULT_L1_CAPACITY,
            l1_ttl_seconds: DEFAULT_L1_TTL_SECONDS,
            warmup_concurrency: DEFAULT_WARMUP_CONCURRENCY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl_seconds: settings.default_ttl.as_secs(),
            tag_ttl_extension_seconds: settings.tag_ttl_extension.as_secs(),
            compress_threshold: settings.compress_threshold,
            lock_ttl_seconds: settings.lock_ttl.as_secs(),
            lock_retry_min_ms: settings.lock_retry_min_ms,
            lock_retry_max_ms: settings.lock_retry_max_ms,
            lock_max_attempts: settings.lock_max_attempts.get(),
            pattern_batch_size: settings.pattern_batch_size.get(),
            write_behind_flush_ms: settings.write_behind_flush.as_millis() as u64,
            l1_capacity: settings.l1_capacity.get(),
            l1_ttl_seconds: settings.l1_ttl.as_secs(),
            warmup_concurrency: settings.warmup_concurrency.get(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn tag_ttl_extension(&self) -> Duration {
        Duration::from_secs(self.tag_ttl_extension_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds.max(1))
    }

    /// Back-off bounds in milliseconds, ordered even if configured backwards.
    pub fn lock_retry_window_ms(&self) -> (u64, u64) {
        let (low, high) = (self.lock_retry_min_ms, self.lock_retry_max_ms);
        if low <= high { (low, high) } else { (high, low) }
    }

    /// At least one lock round is always attempted.
    pub fn lock_max_attempts(&self) -> u32 {
        self.lock_max_attempts.max(1)
    }

    pub fn pattern_batch_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.pattern_batch_size).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn write_behind_flush_interval(&self) -> Duration {
        Duration::from_millis(self.write_behind_flush_ms.max(1))
    }

    /// Returns the L1 capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn l1_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.l1_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_seconds)
    }

    pub fn warmup_concurrency_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.warmup_concurrency).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl(), Duration::from_secs(3600));
        assert_eq!(config.tag_ttl_extension(), Duration::from_secs(3600));
        assert_eq!(config.compress_threshold, 1000);
        assert_eq!(config.lock_ttl(), Duration::from_secs(30));
        assert_eq!(config.lock_retry_window_ms(), (100, 300));
        assert_eq!(config.pattern_batch_size, 100);
        assert_eq!(config.write_behind_flush_interval(), Duration::from_secs(5));
        assert_eq!(config.l1_capacity, 1000);
        assert_eq!(config.l1_ttl(), Duration::from_secs(60));
        assert_eq!(config.warmup_concurrency, 5);
    }

    #[test]
    fn retry_window_is_ordered() {
        let config = CacheConfig {
            lock_retry_min_ms: 400,
            lock_retry_max_ms: 50,
            ..Default::default()
        };
        assert_eq!(config.lock_retry_window_ms(), (50, 400));
    }

    #[test]
    fn zero_limits_clamp() {
        let config = CacheConfig {
            l1_capacity: 0,
            warmup_concurrency: 0,
            pattern_batch_size: 0,
            lock_max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.l1_capacity_non_zero().get(), 1);
        assert_eq!(config.warmup_concurrency_non_zero().get(), 1);
        assert_eq!(config.pattern_batch_size_non_zero().get(), 1);
        assert_eq!(config.lock_max_attempts(), 1);
    }
}
