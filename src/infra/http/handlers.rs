//! Cache admin endpoints.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::application::warmup::WarmupRequest;
use crate::cache::{CacheStatsSnapshot, InvalidationOutcome, InvalidationRequest, WarmupReport};

use super::AdminState;
use super::error::ApiError;
use super::middleware::extract_token;

pub async fn invalidate(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Result<Json<InvalidationRequest>, JsonRejection>,
) -> Result<Json<InvalidationOutcome>, ApiError> {
    let token = extract_token(&headers);
    // Token before body: an unauthorized caller always sees 401.
    if let Err(error) = state.guard.authorize(token.as_deref()) {
        return Err(ApiError::unauthorized(error));
    }
    let Json(request) = body?;

    let outcome = state
        .invalidator
        .invalidate(token.as_deref(), &request)
        .await?;
    Ok(Json(outcome))
}

pub async fn stats(State(state): State<AdminState>) -> Json<CacheStatsSnapshot> {
    Json(state.manager.stats().await)
}

pub async fn warmup(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Result<Json<WarmupRequest>, JsonRejection>,
) -> Result<Json<WarmupReport>, ApiError> {
    let token = extract_token(&headers);
    if let Err(error) = state.guard.authorize(token.as_deref()) {
        return Err(ApiError::unauthorized(error));
    }
    let Json(request) = body?;

    let report = state.warmup.warmup(token.as_deref(), &request).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    store: bool,
}

/// 200 while the store answers, 503 otherwise.
pub async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    let store = state.manager.store().info().await.is_ok();
    let (status, label) = if store {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(HealthBody {
            status: label,
            store,
        }),
    )
}
