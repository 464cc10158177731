//! Key-value store backends.

use std::sync::Arc;

use tracing::info;

use crate::cache::KeyValueStore;
use crate::config::{StoreBackend, StoreSettings};
use crate::infra::error::InfraError;

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Build the backend selected by `store.backend`.
pub async fn connect(settings: &StoreSettings) -> Result<Arc<dyn KeyValueStore>, InfraError> {
    match settings.backend {
        StoreBackend::Memory => {
            info!(store = "memory", "using in-process cache store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(settings).await?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(InfraError::configuration(
            "store.backend = \"redis\" needs a build with the `redis` feature",
        )),
    }
}
