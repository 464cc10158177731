//! Cache admin HTTP surface.

mod error;
mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::warmup::WarmupService;
use crate::cache::{AdminGuard, CacheManager, Invalidator};

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use middleware::{RequestContext, extract_token, log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<CacheManager>,
    pub guard: AdminGuard,
    pub invalidator: Invalidator,
    pub warmup: WarmupService,
}

impl AdminState {
    pub fn new(manager: Arc<CacheManager>, guard: AdminGuard, warmup: WarmupService) -> Self {
        let invalidator = Invalidator::new(manager.clone(), guard.clone());
        Self {
            manager,
            guard,
            invalidator,
            warmup,
        }
    }
}

pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/cache/invalidate", post(handlers::invalidate))
        .route("/api/cache/stats", get(handlers::stats))
        .route("/api/cache/warmup", post(handlers::warmup))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
