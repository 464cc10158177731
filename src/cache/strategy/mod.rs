//! Access patterns layered over [`CacheManager`](super::CacheManager).
//!
//! Each wrapper shares one manager and adds its own population and write
//! policy. All of them implement [`Cache`].

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use super::source::SourceError;

mod cache_aside;
mod multi_level;
mod time_based;
mod write_behind;
mod write_through;

pub use cache_aside::CacheAside;
pub use multi_level::MultiLevel;
pub use time_based::{ExpiryHook, TimeBased};
pub use write_behind::{FlushReport, WriteBehind};
pub use write_through::WriteThrough;

/// Values that can pass through any strategy.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

#[async_trait]
pub trait Cache<T>: Send + Sync {
    /// Read `key`, loading it from the source on a miss.
    async fn get(&self, key: &str) -> Result<T, SourceError>;

    async fn set(&self, key: &str, value: T) -> Result<(), SourceError>;

    /// Drop one key, or everything the strategy owns when `key` is `None`.
    /// Returns how many entries were removed.
    async fn invalidate(&self, key: Option<&str>) -> u64;
}

fn cache_write_failed(key: &str) -> SourceError {
    SourceError::Unavailable(format!("cache write for `{key}` failed"))
}
