//! Error types for the HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use spindle_core::KvmError;
use thiserror::Error;

/// Result type alias for API handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No device with this id is registered.
    #[error("virtio-blk not found: {0}")]
    NotFound(String),

    /// The id is already registered or busy.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request body is unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Attach or detach failed.
    #[error(transparent)]
    Kvm(#[from] KvmError),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Kvm(KvmError::MonitorCreation(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Kvm(KvmError::InvalidDeviceId(_) | KvmError::Config(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Kvm(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }
        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}
