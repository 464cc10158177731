use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::application::warmup::WarmupError;
use crate::cache::{AuthError, InvalidationError};

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_CONFIGURED: &str = "not_configured";
    pub const INVALID_TARGET: &str = "invalid_target";
    pub const NO_ITEMS: &str = "no_items";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized(error: AuthError) -> Self {
        let code = match error {
            AuthError::NotConfigured => codes::NOT_CONFIGURED,
            AuthError::Missing | AuthError::Invalid => codes::UNAUTHORIZED,
        };
        Self::new(
            StatusCode::UNAUTHORIZED,
            code,
            "Admin token required",
            Some(error.to_string()),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("Malformed request body", Some(rejection.body_text()))
    }
}

impl From<InvalidationError> for ApiError {
    fn from(error: InvalidationError) -> Self {
        match error {
            InvalidationError::Unauthorized(auth) => Self::unauthorized(auth),
            InvalidationError::MissingTarget(_) => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_TARGET,
                "Invalidation target missing",
                Some(error.to_string()),
            ),
        }
    }
}

impl From<WarmupError> for ApiError {
    fn from(error: WarmupError) -> Self {
        match error {
            WarmupError::Unauthorized(auth) => Self::unauthorized(auth),
            WarmupError::NoItems => Self::new(
                StatusCode::BAD_REQUEST,
                codes::NO_ITEMS,
                "Warmup request has no items",
                None,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}
