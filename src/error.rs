//! Error types for the gateway
//!
//! Every failure the gateway detects before a response has started is
//! rendered through one JSON envelope:
//! `{"error": {"code": <int>, "message": <string>, "status": <STRING>}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Non-standard status used for requests whose client went away.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No API key provided; send it via the x-goog-api-key header, the key query parameter or a Bearer token")]
    Unauthorized,

    #[error("The provided API key is not valid")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("No upstream API keys are configured")]
    NoCredentialsAvailable,

    #[error("Upstream API key {0} cannot be encoded as a header value")]
    InvalidCredential(String),

    #[error("Upstream request timed out")]
    UpstreamTimeout,

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream responded with {status}: {message}")]
    UpstreamError { status: StatusCode, message: String },

    #[error("Client cancelled the request")]
    ClientCancelled,

    #[error("Persistence error: {0}")]
    Persistence(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub status: String,
}

impl ErrorResponse {
    /// Build an envelope for an arbitrary status code
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: status.as_u16(),
                message: message.into(),
                status: canonical_status(status).to_string(),
            },
        }
    }
}

/// Upstream-style canonical status name for an HTTP status code
pub fn canonical_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        409 => "ABORTED",
        429 => "RESOURCE_EXHAUSTED",
        499 => "CANCELLED",
        501 => "UNIMPLEMENTED",
        502 | 503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        500..=599 => "INTERNAL",
        _ => "UNKNOWN",
    }
}

impl AppError {
    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoCredentialsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamError { status, .. } => *status,
            AppError::ClientCancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_REQUEST),
            AppError::Persistence(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message exposed to clients; internal details stay in the logs
    fn client_message(&self) -> String {
        match self {
            AppError::Persistence(_) => "Usage storage error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::UpstreamError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Nobody is listening any more; close without a body.
        if let AppError::ClientCancelled = self {
            return status.into_response();
        }

        (status, Json(ErrorResponse::new(status, self.client_message()))).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
