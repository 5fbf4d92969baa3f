//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{ErrorCode, error_codes};
use event_store::EventStoreError;
use messaging::{GatewayError, MessagingError};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => error_codes::BAD_REQUEST,
            ApiError::Gateway(e) => e.error_code(),
            ApiError::Messaging(e) => e.error_code(),
            ApiError::EventStore(e) => e.error_code(),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.error_code() {
            error_codes::BAD_REQUEST | error_codes::COMMAND_VALIDATION => StatusCode::BAD_REQUEST,
            error_codes::AGGREGATE_NOT_FOUND => StatusCode::NOT_FOUND,
            error_codes::REQUEST_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
            error_codes::DUPLICATE_AGGREGATE_ID
            | error_codes::EVENT_VERSION_CONFLICT
            | error_codes::DUPLICATE_REQUEST_ID
            | error_codes::COMMAND_DUPLICATE => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        }

        let body = serde_json::json!({
            "errorCode": self.error_code(),
            "errorMsg": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type Result<T> = std::result::Result<T, ApiError>;
