//! Storefront warmup: turns a warmup request into cache keys, tags and a
//! loader-backed source, then hands it to the [`Warmer`].

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::{
    AdminGuard, AuthError, CacheOptions, DataSource, SourceError, Warmer, WarmupItem,
    WarmupOptions, WarmupReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupKind {
    Products,
    Pages,
    Custom,
}

impl WarmupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Pages => "pages",
            Self::Custom => "custom",
        }
    }

    /// Cache key an item of this kind is stored under.
    pub fn cache_key(self, item: &str) -> String {
        match self {
            Self::Products => format!("product:{item}"),
            Self::Pages => format!("page:{item}"),
            Self::Custom => item.to_string(),
        }
    }

    fn default_tags(self) -> Vec<String> {
        match self {
            Self::Products => vec!["products".to_string()],
            Self::Pages => vec!["pages".to_string()],
            Self::Custom => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupConfig {
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Seconds.
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupRequest {
    #[serde(rename = "type")]
    pub kind: WarmupKind,
    pub items: Vec<String>,
    #[serde(default)]
    pub config: WarmupConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WarmupError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
    #[error("warmup request has no items")]
    NoItems,
}

/// Loads the value of one storefront item from wherever it lives.
#[async_trait]
pub trait WarmupLoader: Send + Sync {
    async fn load(&self, kind: WarmupKind, item: &str) -> Result<Value, SourceError>;
}

struct LoaderSource<'a> {
    loader: &'a dyn WarmupLoader,
    kind: WarmupKind,
}

#[async_trait]
impl DataSource<Value> for LoaderSource<'_> {
    async fn fetch(&self, key: &str) -> Result<Value, SourceError> {
        self.loader.load(self.kind, key).await
    }
}

#[derive(Clone)]
pub struct WarmupService {
    warmer: Warmer,
    guard: AdminGuard,
    loader: Arc<dyn WarmupLoader>,
}

impl WarmupService {
    pub fn new(warmer: Warmer, guard: AdminGuard, loader: Arc<dyn WarmupLoader>) -> Self {
        Self {
            warmer,
            guard,
            loader,
        }
    }

    #[instrument(skip_all, fields(kind = request.kind.as_str(), items = request.items.len()))]
    pub async fn warmup(
        &self,
        token: Option<&str>,
        request: &WarmupRequest,
    ) -> Result<WarmupReport, WarmupError> {
        self.guard.authorize(token)?;
        if request.items.is_empty() {
            return Err(WarmupError::NoItems);
        }

        let kind = request.kind;
        let items: Vec<WarmupItem> = request
            .items
            .iter()
            .map(|item| WarmupItem::new(item.as_str(), kind.cache_key(item)))
            .collect();

        let mut cache = CacheOptions::new().with_tags(
            request
                .config
                .tags
                .clone()
                .unwrap_or_else(|| kind.default_tags()),
        );
        if let Some(ttl) = request.config.ttl {
            cache = cache.with_ttl(Duration::from_secs(ttl));
        }
        let options = WarmupOptions {
            concurrency: request.config.concurrency.and_then(NonZeroUsize::new),
            cache,
        };

        let source = LoaderSource {
            loader: self.loader.as_ref(),
            kind,
        };
        Ok(self
            .warmer
            .warm(&items, &source, &options, |progress| {
                debug!(
                    batch = progress.batch,
                    batches = progress.batches,
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    "warmup batch settled"
                );
            })
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheManager};
    use crate::infra::store::MemoryStore;

    const TOKEN: &str = "warm-token";

    struct CatalogLoader;

    #[async_trait]
    impl WarmupLoader for CatalogLoader {
        async fn load(&self, kind: WarmupKind, item: &str) -> Result<Value, SourceError> {
            match (kind, item) {
                (_, "missing") => Err(SourceError::NotFound(item.to_string())),
                (WarmupKind::Pages, path) => Ok(Value::String(format!("<main>{path}</main>"))),
                (_, id) => Ok(serde_json::json!({ "id": id })),
            }
        }
    }

    fn service() -> (Arc<CacheManager>, WarmupService) {
        let manager = Arc::new(CacheManager::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::default(),
        ));
        let service = WarmupService::new(
            Warmer::new(manager.clone()),
            AdminGuard::new(Some(TOKEN)),
            Arc::new(CatalogLoader),
        );
        (manager, service)
    }

    #[tokio::test]
    async fn products_are_cached_under_product_keys_and_tag() {
        let (manager, service) = service();
        let request = WarmupRequest {
            kind: WarmupKind::Products,
            items: (1..=12).map(|id| id.to_string()).collect(),
            config: WarmupConfig {
                concurrency: Some(5),
                ..Default::default()
            },
        };

        let report = service.warmup(Some(TOKEN), &request).await.expect("authorized");

        assert_eq!((report.warmed_up, report.failed), (12, 0));
        let cached: Option<Value> = manager
            .get("product:3", &CacheOptions::new().with_tags(["products"]))
            .await;
        assert_eq!(cached, Some(serde_json::json!({ "id": "3" })));
        assert_eq!(manager.invalidate_tag("products").await, 12);
    }

    #[tokio::test]
    async fn pages_use_request_tags_and_count_failures() {
        let (manager, service) = service();
        let request = WarmupRequest {
            kind: WarmupKind::Pages,
            items: vec!["/".into(), "/sale".into(), "missing".into()],
            config: WarmupConfig {
                tags: Some(vec!["landing".into()]),
                ..Default::default()
            },
        };

        let report = service.warmup(Some(TOKEN), &request).await.expect("authorized");

        assert_eq!((report.warmed_up, report.failed), (2, 1));
        let cached: Option<Value> = manager
            .get("page:/sale", &CacheOptions::new().with_tags(["landing"]))
            .await;
        assert_eq!(cached, Some(Value::String("<main>/sale</main>".into())));
    }

    #[tokio::test]
    async fn rejects_unauthorized_and_empty_requests() {
        let (_, service) = service();
        let request = WarmupRequest {
            kind: WarmupKind::Custom,
            items: Vec::new(),
            config: WarmupConfig::default(),
        };

        assert_eq!(
            service.warmup(None, &request).await,
            Err(WarmupError::Unauthorized(AuthError::Missing))
        );
        assert_eq!(
            service.warmup(Some(TOKEN), &request).await,
            Err(WarmupError::NoItems)
        );
    }

    #[test]
    fn request_parses_wire_shape() {
        let request: WarmupRequest = serde_json::from_str(
            r#"{"type":"products","items":["1","2"],"config":{"concurrency":2,"ttl":60}}"#,
        )
        .expect("parses");
        assert_eq!(request.kind, WarmupKind::Products);
        assert_eq!(request.config.concurrency, Some(2));
        assert_eq!(request.config.tags, None);
    }
}
