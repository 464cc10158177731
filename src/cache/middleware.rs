//! HTTP response caching and CDN cache headers.
//!
//! `with_cache` stores eligible responses through the [`CacheManager`], so
//! they share tags, invalidation and stats with every other entry. Any cache
//! failure falls through to the real handler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::keys::{RESPONSE_PREFIX, normalize_query};
use super::manager::{CacheManager, CacheOptions};

/// Response header carrying `HIT` or `MISS`.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

pub type RequestPredicate = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;
/// Receives the cache key.
pub type CacheHook = Arc<dyn Fn(&str) + Send + Sync>;
/// Receives the cache key and a description of the failure.
pub type CacheErrorHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ResponseCacheOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Request headers whose values take part in the key.
    pub vary_by: Vec<HeaderName>,
    /// Requests for which the predicate is true bypass the cache entirely.
    pub skip_cache: Option<RequestPredicate>,
    pub on_hit: Option<CacheHook>,
    pub on_miss: Option<CacheHook>,
    pub on_error: Option<CacheErrorHook>,
}

impl fmt::Debug for ResponseCacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCacheOptions")
            .field("ttl", &self.ttl)
            .field("tags", &self.tags)
            .field("vary_by", &self.vary_by)
            .field("skip_cache", &self.skip_cache.is_some())
            .finish_non_exhaustive()
    }
}

impl ResponseCacheOptions {
    fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            tags: self.tags.clone(),
            compress: false,
        }
    }
}

#[derive(Clone)]
pub struct ResponseCacheState {
    pub manager: Arc<CacheManager>,
    pub options: Arc<ResponseCacheOptions>,
}

impl ResponseCacheState {
    pub fn new(manager: Arc<CacheManager>, options: ResponseCacheOptions) -> Self {
        Self {
            manager,
            options: Arc::new(options),
        }
    }
}

/// Stored form of a response. The body is base64 so that binary payloads
/// survive the text store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &axum::http::HeaderMap, body: &Bytes) -> Self {
        Self {
            status: status.as_u16(),
            headers: headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.to_string(), value.to_string()))
                })
                .collect(),
            body: STANDARD.encode(body),
        }
    }

    fn restore(self) -> Result<Response, CacheStoreError> {
        let body = STANDARD
            .decode(self.body.as_bytes())
            .map_err(|error| CacheStoreError::Corrupt(error.to_string()))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|error| CacheStoreError::Corrupt(error.to_string()))?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.append(name, value);
            }
        }
        Ok(response)
    }
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("failed to buffer response body: {0}")]
    Buffer(String),
    #[error("cached response is corrupt: {0}")]
    Corrupt(String),
    #[error("cache write rejected")]
    Rejected,
}

/// Cache successful GET/HEAD responses.
///
/// Hits are answered from the cache with `x-cache: HIT`; misses run the
/// handler and store the result when [`should_store_response`] allows it.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn with_cache(
    State(cache): State<ResponseCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }
    if cache
        .options
        .skip_cache
        .as_ref()
        .is_some_and(|skip| skip(&request))
    {
        return next.run(request).await;
    }

    let key = response_cache_key(&request, &cache.options.vary_by);
    let options = cache.options.cache_options();

    if let Some(cached) = cache.manager.get::<CachedResponse>(&key, &options).await {
        match cached.restore() {
            Ok(mut response) => {
                debug!(cache = "response", outcome = "hit", key = %key);
                if let Some(on_hit) = &cache.options.on_hit {
                    on_hit(&key);
                }
                mark(&mut response, "HIT");
                return response;
            }
            Err(error) => report_error(&cache, &key, &error),
        }
    }

    debug!(cache = "response", outcome = "miss", key = %key);
    if let Some(on_miss) = &cache.options.on_miss {
        on_miss(&key);
    }

    let response = next.run(request).await;
    if !should_store_response(&response) {
        return response;
    }

    let mut response = match buffer_response(response).await {
        Ok((rebuilt, cached)) => {
            if !cache.manager.set(&key, &cached, &options).await {
                report_error(&cache, &key, &CacheStoreError::Rejected);
            }
            rebuilt
        }
        Err((rebuilt, error)) => {
            report_error(&cache, &key, &error);
            rebuilt
        }
    };
    mark(&mut response, "MISS");
    response
}

/// `METHOD:path[?sorted query][|header=value...]` under the response prefix.
pub fn response_cache_key(request: &Request<Body>, vary_by: &[HeaderName]) -> String {
    let mut key = format!(
        "{RESPONSE_PREFIX}:{}:{}",
        request.method(),
        request.uri().path()
    );
    let query = normalize_query(request.uri().query().unwrap_or(""));
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query);
    }
    for name in vary_by {
        let value = request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        key.push('|');
        key.push_str(name.as_str());
        key.push('=');
        key.push_str(value);
    }
    key
}

pub fn should_store_response(response: &Response) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    if response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
    {
        return false;
    }

    true
}

pub async fn buffer_response(
    response: Response,
) -> Result<(Response, CachedResponse), (Response, CacheStoreError)> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let cached = CachedResponse::new(parts.status, &parts.headers, &bytes);
            let rebuilt = Response::from_parts(parts, Body::from(bytes));
            Ok((rebuilt, cached))
        }
        Err(error) => {
            let rebuilt = Response::from_parts(parts, Body::empty());
            Err((rebuilt, CacheStoreError::Buffer(error.to_string())))
        }
    }
}

fn mark(response: &mut Response, status: &'static str) {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
}

fn report_error(cache: &ResponseCacheState, key: &str, error: &CacheStoreError) {
    warn!(cache = "response", key, error = %error, "response cache degraded");
    if let Some(on_error) = &cache.options.on_error {
        on_error(key, &error.to_string());
    }
}

/// Shared-cache lifetimes advertised by [`page_cache_headers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCachePolicy {
    pub s_maxage: Duration,
    pub stale_while_revalidate: Duration,
}

impl Default for PageCachePolicy {
    fn default() -> Self {
        Self {
            s_maxage: Duration::from_secs(60),
            stale_while_revalidate: Duration::from_secs(300),
        }
    }
}

impl PageCachePolicy {
    pub fn header_value(&self) -> String {
        format!(
            "public, s-maxage={}, stale-while-revalidate={}",
            self.s_maxage.as_secs(),
            self.stale_while_revalidate.as_secs()
        )
    }
}

/// Add `Cache-Control` to successful GET responses that do not set one.
pub async fn page_cache_headers(
    State(policy): State<PageCachePolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let is_get = request.method() == Method::GET;
    let mut response = next.run(request).await;
    if !is_get
        || !response.status().is_success()
        || response.headers().contains_key(header::CACHE_CONTROL)
    {
        return response;
    }
    match HeaderValue::from_str(&policy.header_value()) {
        Ok(value) => {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
            response
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
