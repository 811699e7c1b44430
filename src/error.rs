//! Unified API error type and conversions.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::drive::DriveError;
use crate::store::StoreError;
use crate::users::QuotaError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthenticated(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    QuotaExceeded(String),
    /// Non-success reply from the Drive API, passed through with its status.
    Upstream(u16, String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::QuotaExceeded(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::Upstream(status, msg) => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                msg,
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        ApiError::Internal(format!("failed to persist records: {error}"))
    }
}

impl From<DriveError> for ApiError {
    fn from(error: DriveError) -> Self {
        match error {
            DriveError::Api { status, message } => ApiError::Upstream(status, message),
            DriveError::MissingCredentials => {
                ApiError::Internal("Google Drive credentials are not configured".into())
            }
            other => ApiError::Upstream(502, other.to_string()),
        }
    }
}

impl From<QuotaError> for ApiError {
    fn from(error: QuotaError) -> Self {
        match error {
            QuotaError::UnknownUser => ApiError::NotFound("user not found".into()),
            exceeded @ QuotaError::Exceeded { .. } => {
                ApiError::QuotaExceeded(exceeded.to_string())
            }
        }
    }
}
