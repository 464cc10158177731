//! Authorized bulk invalidation by tag, key, pattern or full flush.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use super::auth::{AdminGuard, AuthError};
use super::manager::CacheManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationKind {
    Tag,
    Key,
    Pattern,
    All,
}

impl InvalidationKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Key => "key",
            Self::Pattern => "pattern",
            Self::All => "all",
        }
    }
}

/// `target` names the tag, key or glob for the primary kind; `tags` and
/// `keys` are invalidated in addition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRequest {
    #[serde(rename = "type")]
    pub kind: InvalidationKind,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

impl InvalidationRequest {
    pub fn new(kind: InvalidationKind, target: Option<&str>) -> Self {
        Self {
            kind,
            target: target.map(str::to_string),
            tags: Vec::new(),
            keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationOutcome {
    pub success: bool,
    pub message: String,
    pub invalidated: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidationError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
    #[error("invalidation of type `{0}` needs a target, tags or keys")]
    MissingTarget(&'static str),
}

#[derive(Clone)]
pub struct Invalidator {
    manager: Arc<CacheManager>,
    guard: AdminGuard,
}

impl Invalidator {
    pub fn new(manager: Arc<CacheManager>, guard: AdminGuard) -> Self {
        Self { manager, guard }
    }

    /// Authorize `token`, then run the request. Nothing touches the store
    /// when authorization fails.
    #[instrument(skip(self, token), fields(kind = request.kind.as_str()))]
    pub async fn invalidate(
        &self,
        token: Option<&str>,
        request: &InvalidationRequest,
    ) -> Result<InvalidationOutcome, InvalidationError> {
        self.guard.authorize(token)?;
        self.run(request).await
    }

    /// Run a request without the token check. Used by trusted local callers.
    pub async fn run(
        &self,
        request: &InvalidationRequest,
    ) -> Result<InvalidationOutcome, InvalidationError> {
        let target = request
            .target
            .as_deref()
            .map(str::trim)
            .filter(|target| !target.is_empty());
        if request.kind != InvalidationKind::All
            && target.is_none()
            && request.tags.is_empty()
            && request.keys.is_empty()
        {
            return Err(InvalidationError::MissingTarget(request.kind.as_str()));
        }

        let mut success = true;
        let mut invalidated = 0;
        let mut parts = Vec::new();

        match (request.kind, target) {
            (InvalidationKind::All, _) => {
                let keys = self.manager.stats().await.keys;
                success = self.manager.flush().await;
                if success {
                    invalidated += keys;
                    parts.push("flushed all cache entries".to_string());
                } else {
                    parts.push("flush failed".to_string());
                }
            }
            (InvalidationKind::Tag, Some(tag)) => {
                let removed = self.manager.invalidate_tag(tag).await;
                invalidated += removed;
                parts.push(format!("tag `{tag}`: {removed}"));
            }
            (InvalidationKind::Key, Some(key)) => {
                let removed = u64::from(self.manager.del(key, &[]).await);
                invalidated += removed;
                parts.push(format!("key `{key}`: {removed}"));
            }
            (InvalidationKind::Pattern, Some(pattern)) => {
                let removed = self.manager.delete_matching(pattern).await;
                invalidated += removed;
                parts.push(format!("pattern `{pattern}`: {removed}"));
            }
            (_, None) => {}
        }

        if request.kind != InvalidationKind::All {
            for tag in &request.tags {
                invalidated += self.manager.invalidate_tag(tag).await;
            }
            for key in &request.keys {
                invalidated += u64::from(self.manager.del(key, &[]).await);
            }
            if !request.tags.is_empty() {
                parts.push(format!("{} additional tag(s)", request.tags.len()));
            }
            if !request.keys.is_empty() {
                parts.push(format!("{} additional key(s)", request.keys.len()));
            }
        }

        let message = format!("Invalidated {invalidated} entries ({})", parts.join(", "));
        info!(invalidated, success, "cache invalidation finished");
        Ok(InvalidationOutcome {
            success,
            message,
            invalidated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheOptions};
    use crate::infra::store::MemoryStore;

    const TOKEN: &str = "admin-token";

    async fn seeded() -> (Arc<CacheManager>, Invalidator) {
        let manager = Arc::new(CacheManager::new(
            Arc::new(MemoryStore::new()),
            CacheConfig::default(),
        ));
        let products = CacheOptions::new().with_tags(["products"]);
        for id in 1..=3 {
            assert!(manager.set(&format!("product:{id}"), &id, &products).await);
        }
        assert!(manager.set("page:/", &"home", &CacheOptions::new()).await);
        assert!(manager.set("page:/about", &"about", &CacheOptions::new()).await);
        let invalidator = Invalidator::new(manager.clone(), AdminGuard::new(Some(TOKEN)));
        (manager, invalidator)
    }

    #[tokio::test]
    async fn rejects_bad_token_before_touching_store() {
        let (manager, invalidator) = seeded().await;
        let request = InvalidationRequest::new(InvalidationKind::All, None);

        let error = invalidator
            .invalidate(Some("nope"), &request)
            .await
            .unwrap_err();

        assert_eq!(error, InvalidationError::Unauthorized(AuthError::Invalid));
        assert!(manager.exists("page:/", &[]).await);
    }

    #[tokio::test]
    async fn unconfigured_secret_fails_closed() {
        let (manager, _) = seeded().await;
        let invalidator = Invalidator::new(manager, AdminGuard::new(None));
        let request = InvalidationRequest::new(InvalidationKind::Tag, Some("products"));

        assert_eq!(
            invalidator.invalidate(Some(TOKEN), &request).await,
            Err(InvalidationError::Unauthorized(AuthError::NotConfigured))
        );
    }

    #[tokio::test]
    async fn tag_request_removes_tagged_entries() {
        let (_, invalidator) = seeded().await;
        let request = InvalidationRequest::new(InvalidationKind::Tag, Some("products"));

        let outcome = invalidator
            .invalidate(Some(TOKEN), &request)
            .await
            .expect("authorized");

        assert!(outcome.success);
        assert_eq!(outcome.invalidated, 3);
        assert!(outcome.message.contains("tag `products`: 3"));
    }

    #[tokio::test]
    async fn pattern_request_matches_within_namespace() {
        let (manager, invalidator) = seeded().await;
        let request = InvalidationRequest::new(InvalidationKind::Pattern, Some("page:*"));

        let outcome = invalidator
            .invalidate(Some(TOKEN), &request)
            .await
            .expect("authorized");

        assert_eq!(outcome.invalidated, 2);
        assert!(manager.exists("product:1", &["products".to_string()]).await);
    }

    #[tokio::test]
    async fn key_request_with_additional_keys() {
        let (_, invalidator) = seeded().await;
        let mut request = InvalidationRequest::new(InvalidationKind::Key, Some("page:/"));
        request.keys.push("page:/about".into());
        request.tags.push("products".into());

        let outcome = invalidator
            .invalidate(Some(TOKEN), &request)
            .await
            .expect("authorized");

        assert_eq!(outcome.invalidated, 5);
    }

    #[tokio::test]
    async fn all_request_flushes() {
        let (manager, invalidator) = seeded().await;
        let request = InvalidationRequest::new(InvalidationKind::All, None);

        let outcome = invalidator
            .invalidate(Some(TOKEN), &request)
            .await
            .expect("authorized");

        assert!(outcome.success);
        assert_eq!(manager.stats().await.keys, 0);
    }

    #[tokio::test]
    async fn missing_target_is_rejected() {
        let (_, invalidator) = seeded().await;
        let request = InvalidationRequest::new(InvalidationKind::Tag, Some("  "));

        assert_eq!(
            invalidator.invalidate(Some(TOKEN), &request).await,
            Err(InvalidationError::MissingTarget("tag"))
        );
    }

    #[test]
    fn request_uses_type_field() {
        let request: InvalidationRequest =
            serde_json::from_str(r#"{"type":"pattern","target":"product:*"}"#).expect("parses");
        assert_eq!(request.kind, InvalidationKind::Pattern);
        assert_eq!(request.target.as_deref(), Some("product:*"));
        assert!(request.tags.is_empty());
    }
}
