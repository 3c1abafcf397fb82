//! Unified API error handling with structured responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::repl::ReplError;
use crate::store::StoreError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::TooManyRequests(msg) => {
                warn!(error_code = code, message = %msg, "quota hit");
            }
            _ => {
                debug!(error_code = code, message = %message, "client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };
        (status, Json(body)).into_response()
    }
}

/// Map lifecycle errors onto the HTTP taxonomy. The quota maps to 429 and
/// ownership violations to 403; orchestration failures stay internal with
/// the error kind as the message.
impl From<ReplError> for ApiError {
    fn from(err: ReplError) -> Self {
        match err {
            ReplError::InvalidTemplate(_) | ReplError::InvalidId(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ReplError::QuotaExceeded(_) => ApiError::TooManyRequests(err.to_string()),
            ReplError::NotFound => ApiError::NotFound(err.to_string()),
            ReplError::Forbidden => ApiError::Forbidden(err.to_string()),
            ReplError::AlreadyActive(_) | ReplError::NotActive(_) => {
                ApiError::Conflict(err.to_string())
            }
            ReplError::ProbeTimeout
            | ReplError::StorageCopy(_)
            | ReplError::StorageDelete(_)
            | ReplError::Provision(_)
            | ReplError::Teardown(_)
            | ReplError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterError;

    #[test]
    fn quota_maps_to_429_with_the_documented_message() {
        let api_err = ApiError::from(ReplError::QuotaExceeded(2));
        assert_eq!(api_err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(api_err.to_string().contains("Free Account Limit Reached"));
    }

    #[test]
    fn ownership_maps_to_403_with_the_documented_message() {
        let api_err = ApiError::from(ReplError::Forbidden);
        assert_eq!(api_err.status_code(), StatusCode::FORBIDDEN);
        assert!(api_err
            .to_string()
            .contains("This User doesn't have access to this Repl"));
    }

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            ApiError::from(ReplError::InvalidTemplate("ruby".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ReplError::InvalidId("UPPER".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn lifecycle_conflicts_map_to_409() {
        assert_eq!(
            ApiError::from(ReplError::AlreadyActive("repl-1".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ReplError::NotActive("repl-1".into())).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn orchestration_failures_stay_internal() {
        assert_eq!(
            ApiError::from(ReplError::ProbeTimeout).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(ReplError::Provision(ClusterError::Backend("boom".into())))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
