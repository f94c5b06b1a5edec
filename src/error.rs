use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::cidr::RangeError;
use crate::response::ApiResponse;

/// Failures of the record store. Never shown to clients verbatim.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed record {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Absent, expired or exhausted; the cause is deliberately not revealed.
    #[error("Note not found")]
    NotFound,

    #[error("You are not allowed to access this note (IP restricted)")]
    PolicyDenied,

    #[error("Invalid passphrase")]
    VerificationFailed,

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { retry_after: Option<Duration> },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Service temporarily unavailable")]
    StoreUnavailable(#[from] StoreError),

    #[error("Failed to verify if your IP is allowed")]
    PolicyCheck(#[from] RangeError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PolicyDenied | ApiError::VerificationFailed => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PolicyCheck(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::InvalidRequest(crate::validation::describe(&errors))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::StoreUnavailable(source) => {
                tracing::error!(error = %source, "record store failure");
            }
            ApiError::PolicyCheck(source) => {
                tracing::error!(error = %source, "IP policy check failed");
            }
            _ => {}
        }

        let status = self.status_code();
        let mut response = (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response();

        if let ApiError::RateLimited {
            retry_after: Some(wait),
        } = self
        {
            let secs = wait.as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_text_not_exposed() {
        let err = ApiError::from(StoreError::Malformed {
            id: "secret-id".to_string(),
            reason: "internal detail".to_string(),
        });
        assert_eq!(err.to_string(), "Service temporarily unavailable");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::PolicyDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::RateLimited { retry_after: None }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after: Some(Duration::from_millis(200)),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
